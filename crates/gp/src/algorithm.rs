use crate::distribution::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::model::GpModel;
use crate::optimization::Adam;
use crate::parameters::{ExactGpParams, ExactGpValidParams};
use crate::utils::{cholesky_with_jitter, lower_inverse};
use linfa::prelude::{DatasetBase, Fit, Float};
use linfa_linalg::triangular::*;
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use log::{debug, info};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Quantities of the exact marginal likelihood computation reused for prediction
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
#[derive(Debug)]
pub(crate) struct GpInnerParams<F: Float> {
    /// Lower cholesky factor of `K + (noise + nugget) I`
    chol: Array2<F>,
    /// `(K + noise I)^-1 (y - mean)`
    alpha: Array1<F>,
}

impl<F: Float> Clone for GpInnerParams<F> {
    fn clone(&self) -> Self {
        Self {
            chol: self.chol.to_owned(),
            alpha: self.alpha.to_owned(),
        }
    }
}

/// Exact gaussian process regression with a constant mean and a gaussian likelihood
///
/// Kernel hyperparameters, noise variance and constant mean are trained with Adam
/// on the exact negative log marginal likelihood (normalized by the number of
/// training points) for a fixed number of epochs, without early stopping.
///
/// # Example
///
/// ```
/// use linfa::prelude::{Dataset, Fit};
/// use ndarray::{array, Array, Axis};
/// use pwgf_gp::{ExactGp, GpModel, RbfKernel};
///
/// let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
/// let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
///
/// let gp = ExactGp::params(RbfKernel::new(1))
///     .n_epochs(50)
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP fitted");
///
/// let x = Array::linspace(0., 4., 20).insert_axis(Axis(1));
/// let dist = gp.predict(&x).expect("GP prediction");
/// assert_eq!(dist.mean().len(), 20);
/// ```
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct ExactGp<F: Float, K: Kernel<F>> {
    kernel: K,
    likelihood: GaussianLikelihood<F>,
    constant_mean: F,
    nugget: F,
    inner_params: GpInnerParams<F>,
    x_train: Array2<F>,
    losses: Vec<F>,
}

impl<F: Float, K: Kernel<F>> Clone for ExactGp<F, K> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            likelihood: self.likelihood,
            constant_mean: self.constant_mean,
            nugget: self.nugget,
            inner_params: self.inner_params.clone(),
            x_train: self.x_train.to_owned(),
            losses: self.losses.clone(),
        }
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for ExactGp<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExactGp(kernel={}, likelihood={}, mean={})",
            self.kernel, self.likelihood, self.constant_mean
        )
    }
}

impl<F: Float, K: Kernel<F>> ExactGp<F, K> {
    /// Exact GP parameters
    pub fn params(kernel: K) -> ExactGpParams<F, K> {
        ExactGpParams::new(kernel)
    }

    /// Gaussian likelihood
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Constant mean
    pub fn constant_mean(&self) -> F {
        self.constant_mean
    }

    /// Training inputs
    pub fn training_inputs(&self) -> &Array2<F> {
        &self.x_train
    }

    /// Normalized negative log marginal likelihood at each training epoch
    pub fn losses(&self) -> &[F] {
        &self.losses
    }
}

impl<F: Float, K: Kernel<F>> GpModel<F> for ExactGp<F, K> {
    type Kern = K;

    fn kernel(&self) -> &K {
        &self.kernel
    }

    fn observation_noise(&self) -> F {
        self.likelihood.noise()
    }

    fn predict_latent(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<MultivariateNormal<F>> {
        check_input_dim(x.ncols(), self.x_train.ncols())?;
        let k_star = self.kernel.evaluate(x, &self.x_train);
        let mean = k_star
            .dot(&self.inner_params.alpha)
            .mapv(|v| v + self.constant_mean);
        let v = self
            .inner_params
            .chol
            .solve_triangular(&k_star.t(), UPLO::Lower)?;
        let covariance = self.kernel.evaluate(x, x) - v.t().dot(&v);
        MultivariateNormal::new(mean, covariance)
    }
}

fn check_input_dim(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(GpError::ConfigurationError(format!(
            "Expected inputs of dimension {}, got {}",
            expected, actual
        )));
    }
    Ok(())
}

/// Negative log marginal likelihood with the quantities needed by its gradient
struct MarginalLikelihood<F: Float> {
    loss: F,
    inner: GpInnerParams<F>,
}

impl<F: Float> MarginalLikelihood<F> {
    fn compute<K: Kernel<F>>(
        kernel: &K,
        noise: F,
        constant_mean: F,
        nugget: F,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self> {
        let n = F::cast(x.nrows());
        let gram = kernel.evaluate(x, x);
        let chol = cholesky_with_jitter(&gram, noise + nugget, "Exact GP covariance")?;
        let r = y.mapv(|v| v - constant_mean).insert_axis(Axis(1));
        let z = chol.solve_triangular(&r, UPLO::Lower)?;
        let alpha = chol
            .t()
            .solve_triangular_into(z.to_owned(), UPLO::Upper)?
            .remove_axis(Axis(1));
        let log_det = chol.diag().mapv(|v| v.ln()).sum();
        let quad = z.mapv(|v| v * v).sum();
        let half = F::cast(0.5);
        let loss = (half * quad + log_det + half * n * F::cast(2. * std::f64::consts::PI).ln()) / n;
        if !loss.is_finite() {
            return Err(GpError::NumericalError(
                "NaN or Inf detected in exact marginal likelihood".to_string(),
            ));
        }
        Ok(MarginalLikelihood {
            loss,
            inner: GpInnerParams { chol, alpha },
        })
    }

    /// Gradient with respect to `[kernel hyperparameters, raw noise, constant mean]`
    fn gradient<K: Kernel<F>>(
        &self,
        kernel: &K,
        noise: F,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array1<F>> {
        let n = F::cast(x.nrows());
        let half = F::cast(0.5);
        let linv = lower_inverse(&self.inner.chol)?;
        let kinv = linv.t().dot(&linv);
        let alpha = &self.inner.alpha;
        let mut w = -kinv;
        Zip::indexed(&mut w).for_each(|(i, j), v| *v += alpha[i] * alpha[j]);

        let grams = kernel.gram_gradients(x);
        let nk = grams.len();
        let mut grad = Array1::zeros(nk + 2);
        for (g, dk) in grad.iter_mut().zip(grams.iter()) {
            *g = -half * (&w * dk).sum() / n;
        }
        let dnoise = noise - F::cast(GaussianLikelihood::<F>::NOISE_FLOOR);
        grad[nk] = -half * dnoise * w.diag().sum() / n;
        grad[nk + 1] = -alpha.sum() / n;
        Ok(grad)
    }
}

impl<F: Float, K: Kernel<F>, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError>
    for ExactGpValidParams<F, K>
{
    type Object = ExactGp<F, K>;

    /// Fit GP hyperparameters by maximizing the exact marginal likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(GpError::ConfigurationError(format!(
                "Expected non empty training data with as many targets as inputs, got {} inputs and {} targets",
                x.nrows(),
                y.len()
            )));
        }
        if let Some(dim) = self.kernel().input_dim() {
            check_input_dim(x.ncols(), dim)?;
        }

        let mut kernel = self.kernel().clone();
        let mut likelihood = *self.likelihood();
        let mut constant_mean = self.constant_mean();
        let nk = kernel.n_hyperparameters();

        let mut losses = Vec::with_capacity(self.n_epochs());
        if self.n_epochs() > 0 {
            let now = Instant::now();
            let mut theta = Array1::zeros(nk + 2);
            theta.slice_mut(s![..nk]).assign(&kernel.hyperparameters());
            theta[nk] = likelihood.raw_noise();
            theta[nk + 1] = constant_mean;

            let mut adam = Adam::new(theta.len(), self.learning_rate());
            for epoch in 0..self.n_epochs() {
                kernel.set_hyperparameters(&theta.slice(s![..nk]))?;
                let noise = GaussianLikelihood::from_raw_noise(theta[nk]).noise();
                let mll =
                    MarginalLikelihood::compute(&kernel, noise, theta[nk + 1], self.nugget(), x, y)?;
                let grad = mll.gradient(&kernel, noise, x)?;
                debug!("ExactGp epoch {} loss={}", epoch, mll.loss);
                losses.push(mll.loss);
                adam.step(&mut theta, &grad)?;
            }
            kernel.set_hyperparameters(&theta.slice(s![..nk]))?;
            likelihood = GaussianLikelihood::from_raw_noise(theta[nk]);
            constant_mean = theta[nk + 1];
            info!(
                "ExactGp trained in {} epochs ({:?}), final loss={:?}",
                self.n_epochs(),
                now.elapsed(),
                losses.last()
            );
        }

        let mll = MarginalLikelihood::compute(
            &kernel,
            likelihood.noise(),
            constant_mean,
            self.nugget(),
            x,
            y,
        )?;
        Ok(ExactGp {
            kernel,
            likelihood,
            constant_mean,
            nugget: self.nugget(),
            inner_params: mll.inner,
            x_train: x.to_owned(),
            losses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{LinearKernel, RbfKernel};
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use ndarray::{array, Array};

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        (
            array![
                [1.1, 3.5, 3.5],
                [1.3, 7.5, 1.5],
                [2.5, 2.5, 0.5],
                [1.0, 2.0, 3.0],
                [1.5, 2.5, 3.5]
            ],
            array![0.1, 2.3, 3.1, 2.1, 3.3],
        )
    }

    #[test]
    fn test_linear_kernel_conditioning() {
        let (xt, yt) = linear_data();
        let gp = ExactGp::params(LinearKernel::default())
            .n_epochs(0)
            .fit(&Dataset::new(xt, yt))
            .expect("GP fit error");
        let x = array![[3.2, 4.2, 4.0], [5.1, 2.1, 9.5]];
        let dist = gp.predict_latent(&x).expect("prediction error");
        assert_abs_diff_eq!(
            *dist.mean(),
            array![4.2897491455078125, 6.886444091796875],
            epsilon = 1e-4
        );
        assert!(gp.losses().is_empty());
    }

    #[test]
    fn test_interpolation_with_small_noise() {
        let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
        let kernel = RbfKernel::from_params(1.0, array![1.0]).unwrap();
        let gp = ExactGp::params(kernel)
            .likelihood(GaussianLikelihood::new(1e-8).unwrap())
            .n_epochs(0)
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("GP fit error");
        let dist = gp.predict_latent(&xt).expect("prediction error");
        assert_abs_diff_eq!(*dist.mean(), yt, epsilon = 1e-4);
        assert_abs_diff_eq!(dist.variance(), Array1::zeros(5), epsilon = 1e-4);
    }

    #[test]
    fn test_training_decreases_loss() {
        let xt = Array::linspace(0., 4., 20).insert_axis(Axis(1));
        let yt = xt.column(0).mapv(|v| (1.5 * v).sin());
        let gp = ExactGp::params(RbfKernel::new(1))
            .n_epochs(100)
            .learning_rate(0.1)
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("GP fit error");
        let losses = gp.losses();
        assert_eq!(losses.len(), 100);
        assert!(losses[99] < losses[0]);
        let dist = gp.predict(&xt).expect("prediction error");
        let mse = (dist.mean() - &yt).mapv(|v| v * v).mean().unwrap();
        assert!(mse < 0.05, "mse={}", mse);
    }

    #[test]
    fn test_marginal_likelihood_gradient() {
        let xt = array![[0.1, 0.2], [0.5, -0.3], [1.1, 0.7], [-0.4, 0.9]];
        let yt = array![0.3, -0.1, 0.8, 0.2];
        let kernel = RbfKernel::from_params(0.9, array![0.7, 1.3]).unwrap();
        let (noise_raw, mean) = (-1.2f64, 0.1);
        let eval = |theta: &Array1<f64>| {
            let mut k = kernel.clone();
            k.set_hyperparameters(&theta.slice(s![..3])).unwrap();
            let noise = GaussianLikelihood::from_raw_noise(theta[3]).noise();
            MarginalLikelihood::compute(&k, noise, theta[4], 0., &xt, &yt).unwrap()
        };
        let mut theta = Array1::zeros(5);
        theta.slice_mut(s![..3]).assign(&kernel.hyperparameters());
        theta[3] = noise_raw;
        theta[4] = mean;
        let noise = GaussianLikelihood::from_raw_noise(noise_raw).noise();
        let grad = eval(&theta).gradient(&kernel, noise, &xt).unwrap();
        let h = 1e-6;
        for i in 0..5 {
            let mut up = theta.clone();
            up[i] += h;
            let mut down = theta.clone();
            down[i] -= h;
            let fd = (eval(&up).loss - eval(&down).loss) / (2. * h);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_bad_input_dim() {
        let (xt, yt) = linear_data();
        let res = ExactGp::params(RbfKernel::new(2))
            .n_epochs(0)
            .fit(&Dataset::new(xt, yt));
        assert!(matches!(res, Err(GpError::ConfigurationError(_))));
    }
}
