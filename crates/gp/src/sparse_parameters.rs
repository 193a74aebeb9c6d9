use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use linfa::{Float, ParamGuard};
use ndarray::Array2;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Noise variance estimation method
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ParamTuning<F: Float> {
    /// Constant parameter (ie given not estimated)
    Fixed(F),
    /// Parameter is optimized starting from the given initial guess
    Optimized(F),
}

impl<F: Float> Default for ParamTuning<F> {
    fn default() -> ParamTuning<F> {
        Self::Optimized(GaussianLikelihood::<F>::default().noise())
    }
}

impl<F: Float> ParamTuning<F> {
    /// Parameter value, or its initial guess when optimized
    pub fn value(&self) -> F {
        match self {
            ParamTuning::Fixed(v) | ParamTuning::Optimized(v) => *v,
        }
    }
}

/// svGP inducing points specification
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum Inducings<F: Float> {
    /// `usize` points are selected randomly in the training dataset
    Randomized(usize),
    /// Points are given as a (npoints, nx) matrix
    Located(Array2<F>),
}

impl<F: Float> Default for Inducings<F> {
    fn default() -> Inducings<F> {
        Self::Randomized(10)
    }
}

/// A set of validated svGP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct SvgpValidParams<F: Float, K: Kernel<F>> {
    /// Kernel, its hyperparameters being the optimization starting point
    pub(crate) kernel: K,
    /// Gaussian homoscedastic noise variance
    pub(crate) noise: ParamTuning<F>,
    /// Inducing points
    pub(crate) z: Inducings<F>,
    /// Whether inducing point locations are frozen
    pub(crate) is_fixed: bool,
    /// Number of passes over the training data
    pub(crate) n_epochs: usize,
    /// Mini-batch size
    pub(crate) batch_size: usize,
    /// Lower bound of the learning rate search
    pub(crate) learning_rate_lower: F,
    /// Upper bound of the learning rate search
    pub(crate) learning_rate_upper: F,
    /// Number of learning rates tried
    pub(crate) n_learning_rate_searches: usize,
    /// Diagonal regularization of inducing and predictive covariances
    pub(crate) jitter: F,
    /// Random generator seed
    pub(crate) seed: Option<u64>,
}

impl<F: Float, K: Kernel<F>> SvgpValidParams<F, K> {
    /// Get kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get noise variance configuration
    pub fn noise_variance(&self) -> &ParamTuning<F> {
        &self.noise
    }

    /// Get inducing points
    pub fn inducings(&self) -> &Inducings<F> {
        &self.z
    }

    /// Whether inducing point locations are frozen
    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    /// Get number of epochs
    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }

    /// Get mini-batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get learning rate search bounds (lower, upper)
    pub fn learning_rate_bounds(&self) -> (F, F) {
        (self.learning_rate_lower, self.learning_rate_upper)
    }

    /// Get number of learning rates tried
    pub fn n_learning_rate_searches(&self) -> usize {
        self.n_learning_rate_searches
    }

    /// Get jitter
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Get seed
    pub fn seed(&self) -> Option<&u64> {
        self.seed.as_ref()
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [svGP algorithm](crate::SparseVariationalGp).
pub struct SvgpParams<F: Float, K: Kernel<F>>(SvgpValidParams<F, K>);

impl<F: Float, K: Kernel<F>> SvgpParams<F, K> {
    /// Default jitter added to inducing and predictive covariances
    pub const DEFAULT_JITTER: f64 = 1e-4;

    /// A constructor for svGP parameters given a kernel and inducing points
    pub fn new(kernel: K, inducings: Inducings<F>) -> SvgpParams<F, K> {
        Self(SvgpValidParams {
            kernel,
            noise: ParamTuning::default(),
            z: inducings,
            is_fixed: false,
            n_epochs: 10,
            batch_size: 256,
            learning_rate_lower: F::cast(1e-3),
            learning_rate_upper: F::cast(1e-1),
            n_learning_rate_searches: 3,
            jitter: F::cast(Self::DEFAULT_JITTER),
            seed: None,
        })
    }

    /// A constructor for svGP parameters from validated parameters
    pub fn new_from_valid(params: &SvgpValidParams<F, K>) -> Self {
        Self(params.clone())
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Specify the noise variance, either constant or optimized from an initial guess
    pub fn noise_variance(mut self, config: ParamTuning<F>) -> Self {
        self.0.noise = config;
        self
    }

    /// Specify inducing points
    pub fn inducings(mut self, z: Inducings<F>) -> Self {
        self.0.z = z;
        self
    }

    /// Freeze (`true`) or learn (`false`) inducing point locations
    pub fn is_fixed(mut self, is_fixed: bool) -> Self {
        self.0.is_fixed = is_fixed;
        self
    }

    /// Set number of passes over training data
    pub fn n_epochs(mut self, n_epochs: usize) -> Self {
        self.0.n_epochs = n_epochs;
        self
    }

    /// Set mini-batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.0.batch_size = batch_size;
        self
    }

    /// Set learning rate search range and number of tried values
    pub fn learning_rate_search(mut self, lower: F, upper: F, n_searches: usize) -> Self {
        self.0.learning_rate_lower = lower;
        self.0.learning_rate_upper = upper;
        self.0.n_learning_rate_searches = n_searches;
        self
    }

    /// Set jitter
    pub fn jitter(mut self, jitter: F) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Set the seed used for inducing point and mini-batch sampling
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for SvgpParams<F, K> {
    type Checked = SvgpValidParams<F, K>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let params = &self.0;
        if let Inducings::Randomized(0) = params.z {
            return Err(GpError::ConfigurationError(
                "Number of inducing points should be positive".to_string(),
            ));
        }
        if let Inducings::Located(z) = &params.z {
            if z.nrows() == 0 {
                return Err(GpError::ConfigurationError(
                    "Number of inducing points should be positive".to_string(),
                ));
            }
        }
        if params.batch_size == 0 {
            return Err(GpError::ConfigurationError(
                "Batch size should be positive".to_string(),
            ));
        }
        if !(params.noise.value() > F::zero()) {
            return Err(GpError::ConfigurationError(format!(
                "Noise variance should be positive, got {}",
                params.noise.value()
            )));
        }
        if !(params.jitter >= F::zero()) {
            return Err(GpError::ConfigurationError(format!(
                "Jitter should be non negative, got {}",
                params.jitter
            )));
        }
        crate::optimization::learning_rate_grid(
            params.learning_rate_lower,
            params.learning_rate_upper,
            params.n_learning_rate_searches,
        )?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
