use crate::distribution::MultivariateNormal;
use crate::errors::Result;
use crate::kernels::Kernel;
use linfa::Float;
use ndarray::{ArrayBase, Data, Ix2};

/// Capability shared by every regression model of the pipeline
/// (exact, sparse variational, particle based, tempered).
pub trait GpModel<F: Float> {
    /// Covariance kernel type
    type Kern: Kernel<F>;

    /// Kernel used by the model
    fn kernel(&self) -> &Self::Kern;

    /// Gaussian observation noise variance
    fn observation_noise(&self) -> F;

    /// Distribution of the latent function values at `x` given as a (n, nx) matrix
    fn predict_latent(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>)
        -> Result<MultivariateNormal<F>>;

    /// Predictive distribution of observations at `x`, latent covariance inflated by the noise variance
    fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<MultivariateNormal<F>> {
        Ok(self
            .predict_latent(x)?
            .add_diagonal(self.observation_noise()))
    }
}
