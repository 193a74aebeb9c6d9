//! A module for covariance kernels used by exact, sparse and flow-based GP models.
//!
//! The following kernels are implemented:
//! * scaled squared exponential with automatic relevance determination ([`RbfKernel`]),
//! * linear ([`LinearKernel`]).
//!
//! Hyperparameters are exposed in log space so that gradient-based optimizers
//! work on an unconstrained vector.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for covariance kernels `k(x, x')`
pub trait Kernel<F: Float>: Clone + fmt::Debug + fmt::Display + Sync {
    /// Compute the (n1, n2) covariance matrix between rows of `x1` and rows of `x2`
    fn evaluate(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F>;

    /// Compute the prior variances `k(x_i, x_i)` of the rows of `x`
    fn diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        x.outer_iter()
            .map(|row| {
                let row = row.insert_axis(Axis(0));
                self.evaluate(&row, &row)[[0, 0]]
            })
            .collect()
    }

    /// Input dimension expected by the kernel, if it is tied to one
    fn input_dim(&self) -> Option<usize> {
        None
    }

    /// Log-space hyperparameters
    fn hyperparameters(&self) -> Array1<F>;

    /// Set hyperparameters from their log-space values
    fn set_hyperparameters(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()>;

    /// Derivatives of the gram matrix `K(x, x)` with respect to each log-space hyperparameter,
    /// given in the [`Kernel::hyperparameters`] order.
    fn gram_gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Vec<Array2<F>>;

    /// Number of hyperparameters
    fn n_hyperparameters(&self) -> usize {
        self.hyperparameters().len()
    }
}

fn check_hyperparameters_len<F: Float>(
    params: &ArrayBase<impl Data<Elem = F>, Ix1>,
    expected: usize,
) -> Result<()> {
    if params.len() != expected {
        return Err(GpError::ConfigurationError(format!(
            "Expected {} kernel hyperparameters, got {}",
            expected,
            params.len()
        )));
    }
    if params.iter().any(|v| !v.is_finite()) {
        return Err(GpError::NumericalError(
            "Kernel hyperparameters should be finite".to_string(),
        ));
    }
    Ok(())
}

/// Scaled squared exponential kernel with one lengthscale per input dimension
///
/// `k(x, x') = s * exp(-0.5 * sum_d ((x_d - x'_d) / l_d)^2)`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct RbfKernel<F: Float> {
    outputscale: F,
    lengthscales: Array1<F>,
}

impl<F: Float> RbfKernel<F> {
    /// Initial value of outputscale and lengthscales, `softplus(0) = ln 2`
    pub const DEFAULT_INIT: f64 = std::f64::consts::LN_2;

    /// Kernel for `dim`-dimensional inputs with default hyperparameters
    pub fn new(dim: usize) -> Self {
        RbfKernel {
            outputscale: F::cast(Self::DEFAULT_INIT),
            lengthscales: Array1::from_elem(dim, F::cast(Self::DEFAULT_INIT)),
        }
    }

    /// Kernel with given outputscale and lengthscales
    pub fn from_params(outputscale: F, lengthscales: Array1<F>) -> Result<Self> {
        if lengthscales.is_empty() {
            return Err(GpError::ConfigurationError(
                "RbfKernel needs at least one lengthscale".to_string(),
            ));
        }
        if outputscale <= F::zero() || lengthscales.iter().any(|l| *l <= F::zero()) {
            return Err(GpError::ConfigurationError(format!(
                "RbfKernel parameters should be positive, got outputscale={} lengthscales={}",
                outputscale, lengthscales
            )));
        }
        Ok(RbfKernel {
            outputscale,
            lengthscales,
        })
    }

    /// Outputscale `s`
    pub fn outputscale(&self) -> F {
        self.outputscale
    }

    /// Lengthscales `l_d`
    pub fn lengthscales(&self) -> &Array1<F> {
        &self.lengthscales
    }

    /// Kernel whose parameters are the arithmetic means of the given kernels ones
    pub fn average(kernels: &[Self]) -> Result<Self> {
        let first = kernels.first().ok_or_else(|| {
            GpError::ConfigurationError("Cannot average an empty set of kernels".to_string())
        })?;
        if kernels
            .iter()
            .any(|k| k.lengthscales.len() != first.lengthscales.len())
        {
            return Err(GpError::ConfigurationError(
                "Cannot average kernels of different input dimensions".to_string(),
            ));
        }
        let n = F::cast(kernels.len());
        let outputscale = kernels.iter().fold(F::zero(), |acc, k| acc + k.outputscale) / n;
        let lengthscales = kernels
            .iter()
            .fold(Array1::zeros(first.lengthscales.len()), |acc, k| {
                acc + &k.lengthscales
            })
            / n;
        Self::from_params(outputscale, lengthscales)
    }

    /// Squared distances between rows scaled by lengthscales
    fn scaled_sq_distances(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        let x1s = x1 / &self.lengthscales;
        let x2s = x2 / &self.lengthscales;
        let mut d2 = Array2::zeros((x1.nrows(), x2.nrows()));
        Zip::from(d2.rows_mut())
            .and(x1s.rows())
            .for_each(|row, a| {
                Zip::from(row).and(x2s.rows()).for_each(|v, b| {
                    *v = Zip::from(&a)
                        .and(&b)
                        .fold(F::zero(), |acc, &ai, &bi| acc + (ai - bi) * (ai - bi));
                });
            });
        d2
    }
}

impl<F: Float> fmt::Display for RbfKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RbfKernel(outputscale={}, lengthscales={})",
            self.outputscale, self.lengthscales
        )
    }
}

impl<F: Float> Kernel<F> for RbfKernel<F> {
    fn evaluate(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        let half = F::cast(0.5);
        self.scaled_sq_distances(x1, x2)
            .mapv(|d2| self.outputscale * F::exp(-half * d2))
    }

    fn diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        Array1::from_elem(x.nrows(), self.outputscale)
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.lengthscales.len())
    }

    /// `[ln s, ln l_1, ..., ln l_d]`
    fn hyperparameters(&self) -> Array1<F> {
        let mut params = Array1::zeros(self.lengthscales.len() + 1);
        params[0] = self.outputscale.ln();
        params
            .slice_mut(ndarray::s![1..])
            .assign(&self.lengthscales.mapv(|l| l.ln()));
        params
    }

    fn set_hyperparameters(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_hyperparameters_len(params, self.lengthscales.len() + 1)?;
        self.outputscale = params[0].exp();
        self.lengthscales = params.slice(ndarray::s![1..]).mapv(|v| v.exp());
        Ok(())
    }

    fn gram_gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Vec<Array2<F>> {
        let k = self.evaluate(x, x);
        let n = x.nrows();
        let mut grads = Vec::with_capacity(self.lengthscales.len() + 1);
        grads.push(k.clone());
        for (d, l) in self.lengthscales.iter().enumerate() {
            let c = x.column(d).mapv(|v| v / *l);
            let diff2 = Array2::from_shape_fn((n, n), |(i, j)| (c[i] - c[j]) * (c[i] - c[j]));
            grads.push(&k * &diff2);
        }
        grads
    }
}

/// Linear kernel `k(x, x') = v * x.x'`
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct LinearKernel<F: Float> {
    variance: F,
}

impl<F: Float> Default for LinearKernel<F> {
    fn default() -> Self {
        LinearKernel {
            variance: F::one(),
        }
    }
}

impl<F: Float> LinearKernel<F> {
    /// Linear kernel with given variance
    pub fn new(variance: F) -> Result<Self> {
        if variance <= F::zero() {
            return Err(GpError::ConfigurationError(format!(
                "LinearKernel variance should be positive, got {}",
                variance
            )));
        }
        Ok(LinearKernel { variance })
    }

    /// Variance `v`
    pub fn variance(&self) -> F {
        self.variance
    }
}

impl<F: Float> fmt::Display for LinearKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinearKernel(variance={})", self.variance)
    }
}

impl<F: Float> Kernel<F> for LinearKernel<F> {
    fn evaluate(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        x1.dot(&x2.t()).mapv(|v| v * self.variance)
    }

    fn diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        x.mapv(|v| v * v).sum_axis(Axis(1)).mapv(|v| v * self.variance)
    }

    /// `[ln v]`
    fn hyperparameters(&self) -> Array1<F> {
        Array1::from_elem(1, self.variance.ln())
    }

    fn set_hyperparameters(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_hyperparameters_len(params, 1)?;
        self.variance = params[0].exp();
        Ok(())
    }

    fn gram_gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Vec<Array2<F>> {
        vec![self.evaluate(x, x)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use paste::paste;

    #[test]
    fn test_rbf_kernel_values() {
        let kernel = RbfKernel::from_params(2.0, array![1.0]).unwrap();
        let x = array![[0.0], [1.0], [3.0]];
        let k = kernel.evaluate(&x, &x);
        let expected = array![
            [2.0, 2.0 * (-0.5f64).exp(), 2.0 * (-4.5f64).exp()],
            [2.0 * (-0.5f64).exp(), 2.0, 2.0 * (-2.0f64).exp()],
            [2.0 * (-4.5f64).exp(), 2.0 * (-2.0f64).exp(), 2.0]
        ];
        assert_abs_diff_eq!(k, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(kernel.diag(&x), array![2.0, 2.0, 2.0], epsilon = 1e-12);
    }

    #[test]
    fn test_rbf_kernel_ard() {
        let kernel = RbfKernel::from_params(1.0, array![1.0, 10.0]).unwrap();
        let x1 = array![[0.0, 0.0]];
        let x2 = array![[1.0, 0.0], [0.0, 1.0]];
        let k = kernel.evaluate(&x1, &x2);
        assert_abs_diff_eq!(k[[0, 0]], (-0.5f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(k[[0, 1]], (-0.005f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_linear_kernel_values() {
        let kernel = LinearKernel::default();
        let x = array![[1.0, 2.0, 3.0], [1.5, 2.5, 3.5]];
        let k = kernel.evaluate(&x, &x);
        assert_abs_diff_eq!(k, array![[14.0, 17.0], [17.0, 20.75]], epsilon = 1e-12);
        assert_abs_diff_eq!(kernel.diag(&x), array![14.0, 20.75], epsilon = 1e-12);
    }

    #[test]
    fn test_rbf_average() {
        let k1 = RbfKernel::from_params(1.0, array![1.0, 2.0]).unwrap();
        let k2 = RbfKernel::from_params(3.0, array![3.0, 4.0]).unwrap();
        let avg = RbfKernel::average(&[k1, k2]).unwrap();
        assert_abs_diff_eq!(avg.outputscale(), 2.0);
        assert_abs_diff_eq!(*avg.lengthscales(), array![2.0, 3.0]);
        assert!(RbfKernel::<f64>::average(&[]).is_err());
    }

    #[test]
    fn test_set_hyperparameters_bad_len() {
        let mut kernel = RbfKernel::<f64>::new(2);
        assert!(kernel.set_hyperparameters(&array![0.0, 0.0]).is_err());
        kernel.set_hyperparameters(&array![0.0, 0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(kernel.outputscale(), 1.0);
        assert_abs_diff_eq!(kernel.lengthscales()[1], 1f64.exp());
    }

    macro_rules! test_gram_gradients {
        ($kernel:ident, $init:expr) => {
            paste! {
                #[test]
                fn [<test_gram_gradients_ $kernel:snake>]() {
                    let kernel: $kernel<f64> = $init;
                    let x = array![[0.1, 0.3], [0.7, -0.2], [-0.5, 0.4], [1.2, 0.9]];
                    let grads = kernel.gram_gradients(&x);
                    let theta = kernel.hyperparameters();
                    assert_eq!(grads.len(), theta.len());
                    let h = 1e-6;
                    for (i, grad) in grads.iter().enumerate() {
                        let mut up = kernel.clone();
                        let mut down = kernel.clone();
                        let mut theta_up = theta.clone();
                        theta_up[i] += h;
                        let mut theta_down = theta.clone();
                        theta_down[i] -= h;
                        up.set_hyperparameters(&theta_up).unwrap();
                        down.set_hyperparameters(&theta_down).unwrap();
                        let fd = (up.evaluate(&x, &x) - down.evaluate(&x, &x)) / (2. * h);
                        assert_abs_diff_eq!(*grad, fd, epsilon = 1e-6);
                    }
                }
            }
        };
    }

    test_gram_gradients!(
        RbfKernel,
        RbfKernel::from_params(1.3, Array::from_vec(vec![0.8, 1.7])).unwrap()
    );
    test_gram_gradients!(LinearKernel, LinearKernel::new(0.7).unwrap());
}
