use crate::errors::{FlowError, Result};
use linfa::Float;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use pwgf_gp::utils::cholesky_with_jitter;
use pwgf_gp::Kernel;
use std::fmt;

/// Kernel wrapper carrying a Nyström approximation of its base kernel
///
/// Given approximation samples `S` and `L = chol(K_SS + jitter I)`, the reduced-rank
/// features are `Φ(x) = k(x, S) L^-T` so that `k(x, x') ≈ Φ(x) Φ(x')^T`.
///
/// [`Kernel::evaluate`] returns the exact base kernel evaluation, the low-rank
/// approximation is only used by the data-fit term of the gradient flow through
/// [`GradientFlowKernel::features`] and [`GradientFlowKernel::approximate`].
#[derive(Clone, Debug)]
pub struct GradientFlowKernel<F: Float, K: Kernel<F>> {
    base: K,
    samples: Array2<F>,
    jitter: F,
    /// Lower cholesky factor of `K_SS + jitter I`
    chol: Array2<F>,
}

impl<F: Float, K: Kernel<F>> GradientFlowKernel<F, K> {
    /// Default jitter added to the sample gram matrix
    pub const DEFAULT_JITTER: f64 = 1e-6;

    /// Wrap `base` with a Nyström approximation built on `approximation_samples`
    pub fn new(base: K, approximation_samples: Array2<F>) -> Result<Self> {
        Self::build(base, approximation_samples, F::cast(Self::DEFAULT_JITTER))
    }

    /// Rebuild the Nyström factorization with another jitter
    pub fn with_jitter(self, jitter: F) -> Result<Self> {
        if !(jitter >= F::zero()) {
            return Err(FlowError::configuration(format!(
                "Nyström jitter should be non negative, got {}",
                jitter
            )));
        }
        Self::build(self.base, self.samples, jitter)
    }

    fn build(base: K, samples: Array2<F>, jitter: F) -> Result<Self> {
        if samples.nrows() == 0 {
            return Err(FlowError::configuration(
                "Nyström approximation needs at least one sample",
            ));
        }
        if let Some(dim) = base.input_dim() {
            if dim != samples.ncols() {
                return Err(FlowError::configuration(format!(
                    "Approximation samples of dimension {} do not match kernel dimension {}",
                    samples.ncols(),
                    dim
                )));
            }
        }
        let chol = Self::factorize(&base, &samples, jitter)?;
        Ok(GradientFlowKernel {
            base,
            samples,
            jitter,
            chol,
        })
    }

    fn factorize(base: &K, samples: &Array2<F>, jitter: F) -> Result<Array2<F>> {
        let kss = base.evaluate(samples, samples);
        Ok(cholesky_with_jitter(&kss, jitter, "Nyström sample gram")?)
    }

    /// Wrapped base kernel
    pub fn base_kernel(&self) -> &K {
        &self.base
    }

    /// Approximation samples `S`
    pub fn approximation_samples(&self) -> &Array2<F> {
        &self.samples
    }

    /// Nyström jitter
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Rank of the approximation, the number of samples
    pub fn rank(&self) -> usize {
        self.samples.nrows()
    }

    /// Reduced-rank features `Φ(x) = k(x, S) L^-T`, a (n, rank) matrix
    pub fn features(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        if x.ncols() != self.samples.ncols() {
            return Err(FlowError::configuration(format!(
                "Expected inputs of dimension {}, got {}",
                self.samples.ncols(),
                x.ncols()
            )));
        }
        let ksx = self.base.evaluate(&self.samples, x);
        let phi_t = self.chol.solve_triangular(&ksx, UPLO::Lower)?;
        Ok(phi_t.reversed_axes())
    }

    /// Low-rank kernel `Φ(x1) Φ(x2)^T`
    pub fn approximate(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        Ok(self.features(x1)?.dot(&self.features(x2)?.t()))
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for GradientFlowKernel<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GradientFlowKernel(base={}, rank={})",
            self.base,
            self.rank()
        )
    }
}

impl<F: Float, K: Kernel<F>> Kernel<F> for GradientFlowKernel<F, K> {
    fn evaluate(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        self.base.evaluate(x1, x2)
    }

    fn diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        self.base.diag(x)
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.samples.ncols())
    }

    fn hyperparameters(&self) -> Array1<F> {
        self.base.hyperparameters()
    }

    /// Set base kernel hyperparameters and refactorize the Nyström approximation
    fn set_hyperparameters(
        &mut self,
        params: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> pwgf_gp::Result<()> {
        let mut base = self.base.clone();
        base.set_hyperparameters(params)?;
        let chol = Self::factorize(&base, &self.samples, self.jitter)?;
        self.base = base;
        self.chol = chol;
        Ok(())
    }

    fn gram_gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Vec<Array2<F>> {
        self.base.gram_gradients(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use pwgf_gp::{LinearKernel, RbfKernel};

    fn grid(n: usize) -> Array2<f64> {
        Array::linspace(-2., 2., n).insert_axis(ndarray::Axis(1))
    }

    #[test]
    fn test_evaluate_matches_base_kernel() {
        let base = RbfKernel::from_params(1.3, array![0.7]).unwrap();
        let kernel = GradientFlowKernel::new(base.clone(), grid(5)).unwrap();
        let x1 = grid(11);
        let x2 = array![[0.3], [-1.7]];
        assert_abs_diff_eq!(kernel.evaluate(&x1, &x2), base.evaluate(&x1, &x2), epsilon = 1e-6);
        assert_abs_diff_eq!(kernel.diag(&x1), base.diag(&x1), epsilon = 1e-6);
    }

    #[test]
    fn test_nystrom_is_exact_on_samples() {
        let base = RbfKernel::from_params(1.0, array![0.8]).unwrap();
        let samples = grid(6);
        let kernel = GradientFlowKernel::new(base.clone(), samples.clone()).unwrap();
        let approx = kernel.approximate(&samples, &samples).unwrap();
        assert_abs_diff_eq!(approx, base.evaluate(&samples, &samples), epsilon = 1e-5);
        assert_eq!(kernel.features(&grid(9)).unwrap().dim(), (9, 6));
    }

    #[test]
    fn test_nystrom_is_exact_for_low_rank_kernel() {
        // a linear kernel on 2-D inputs has rank 2, so two generic samples span it
        let kernel =
            GradientFlowKernel::new(LinearKernel::default(), array![[1., 0.5], [-0.3, 2.]]).unwrap();
        let x = array![[0.2, 1.0], [3.0, -1.0], [1.5, 1.5]];
        assert_abs_diff_eq!(
            kernel.approximate(&x, &x).unwrap(),
            kernel.evaluate(&x, &x),
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_empty_samples() {
        let res = GradientFlowKernel::new(RbfKernel::<f64>::new(1), Array2::zeros((0, 1)));
        assert!(res.unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_set_hyperparameters_refactorizes() {
        let samples = grid(4);
        let mut kernel = GradientFlowKernel::new(RbfKernel::new(1), samples.clone()).unwrap();
        kernel
            .set_hyperparameters(&array![2f64.ln(), 0.5f64.ln()])
            .unwrap();
        let expected = RbfKernel::from_params(2.0, array![0.5]).unwrap();
        assert_abs_diff_eq!(
            kernel.approximate(&samples, &samples).unwrap(),
            expected.evaluate(&samples, &samples),
            epsilon = 1e-5
        );
        assert_eq!(kernel.hyperparameters().len(), 2);
    }
}
