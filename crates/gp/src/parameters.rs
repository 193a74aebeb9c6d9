use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of Adam epochs for marginal likelihood optimization
pub const GP_DEFAULT_EPOCHS: usize = 100;
/// Default Adam learning rate for marginal likelihood optimization
pub const GP_DEFAULT_LEARNING_RATE: f64 = 0.1;

/// A set of validated exact GP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct ExactGpValidParams<F: Float, K: Kernel<F>> {
    /// Kernel, its hyperparameters being the optimization starting point
    pub(crate) kernel: K,
    /// Likelihood, its noise being the optimization starting point
    pub(crate) likelihood: GaussianLikelihood<F>,
    /// Initial constant mean
    pub(crate) constant_mean: F,
    /// Adam learning rate
    pub(crate) learning_rate: F,
    /// Number of Adam epochs, 0 meaning no optimization
    pub(crate) n_epochs: usize,
    /// Parameter added to the diagonal of the covariance matrix
    pub(crate) nugget: F,
}

impl<F: Float, K: Kernel<F>> ExactGpValidParams<F, K> {
    /// Get kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get likelihood
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Get initial constant mean
    pub fn constant_mean(&self) -> F {
        self.constant_mean
    }

    /// Get learning rate
    pub fn learning_rate(&self) -> F {
        self.learning_rate
    }

    /// Get number of epochs
    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }

    /// Get nugget
    pub fn nugget(&self) -> F {
        self.nugget
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [exact GP algorithm](crate::ExactGp).
pub struct ExactGpParams<F: Float, K: Kernel<F>>(ExactGpValidParams<F, K>);

impl<F: Float, K: Kernel<F>> ExactGpParams<F, K> {
    /// A constructor for exact GP parameters given a kernel
    pub fn new(kernel: K) -> ExactGpParams<F, K> {
        Self(ExactGpValidParams {
            kernel,
            likelihood: GaussianLikelihood::default(),
            constant_mean: F::zero(),
            learning_rate: F::cast(GP_DEFAULT_LEARNING_RATE),
            n_epochs: GP_DEFAULT_EPOCHS,
            nugget: F::cast(100.0) * F::epsilon(),
        })
    }

    /// A constructor for exact GP parameters from validated parameters
    pub fn new_from_valid(params: &ExactGpValidParams<F, K>) -> Self {
        Self(params.clone())
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set likelihood.
    pub fn likelihood(mut self, likelihood: GaussianLikelihood<F>) -> Self {
        self.0.likelihood = likelihood;
        self
    }

    /// Set initial constant mean.
    pub fn constant_mean(mut self, constant_mean: F) -> Self {
        self.0.constant_mean = constant_mean;
        self
    }

    /// Set Adam learning rate.
    pub fn learning_rate(mut self, learning_rate: F) -> Self {
        self.0.learning_rate = learning_rate;
        self
    }

    /// Set number of Adam epochs.
    ///
    /// With 0 epochs the model is conditioned on training data with the given kernel and likelihood.
    pub fn n_epochs(mut self, n_epochs: usize) -> Self {
        self.0.n_epochs = n_epochs;
        self
    }

    /// Set nugget value.
    ///
    /// Nugget is used to improve numerical stability
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for ExactGpParams<F, K> {
    type Checked = ExactGpValidParams<F, K>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if !(self.0.learning_rate > F::zero()) || !self.0.learning_rate.is_finite() {
            return Err(GpError::ConfigurationError(format!(
                "Learning rate should be positive, got {}",
                self.0.learning_rate
            )));
        }
        if !(self.0.nugget >= F::zero()) {
            return Err(GpError::ConfigurationError(format!(
                "Nugget should be non negative, got {}",
                self.0.nugget
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
