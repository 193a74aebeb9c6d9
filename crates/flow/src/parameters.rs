use crate::errors::{FlowError, Result};
use crate::kernel::GradientFlowKernel;
use linfa::{Float, ParamGuard};
use ndarray::{Array1, Array2};
use pwgf_gp::optimization::learning_rate_grid;
use pwgf_gp::Kernel;

/// Default number of particles
pub const PWGF_DEFAULT_PARTICLES: usize = 100;
/// Default number of epochs
pub const PWGF_DEFAULT_EPOCHS: usize = 100;

/// A set of validated PWGF parameters.
#[derive(Clone, Debug)]
pub struct PwgfValidParams<F: Float, K: Kernel<F>> {
    /// Kernel with its Nyström approximation
    pub(crate) kernel: GradientFlowKernel<F, K>,
    /// Induce points where particles are evaluated
    pub(crate) x_induce: Array2<F>,
    /// Population size
    pub(crate) number_of_particles: usize,
    /// Diagonal regularization of the induce gram matrix
    pub(crate) jitter: F,
    /// Gaussian observation noise variance
    pub(crate) observation_noise: F,
    /// Seed of the particle initialization
    pub(crate) seed: u64,
    /// Number of flow epochs
    pub(crate) number_of_epochs: usize,
    /// Lower bound of the learning rate search
    pub(crate) learning_rate_lower: F,
    /// Upper bound of the learning rate search
    pub(crate) learning_rate_upper: F,
    /// Number of learning rates tried per epoch
    pub(crate) number_of_learning_rate_searches: usize,
    /// Maximum L2 norm of a particle
    pub(crate) max_particle_magnitude: F,
    /// Whether particles are recorded after each epoch
    pub(crate) record_trajectory: bool,
    /// Data used to select learning rates, training data when `None`
    pub(crate) validation: Option<(Array2<F>, Array1<F>)>,
}

impl<F: Float, K: Kernel<F>> PwgfValidParams<F, K> {
    /// Get kernel
    pub fn kernel(&self) -> &GradientFlowKernel<F, K> {
        &self.kernel
    }

    /// Get induce points
    pub fn x_induce(&self) -> &Array2<F> {
        &self.x_induce
    }

    /// Get number of particles
    pub fn number_of_particles(&self) -> usize {
        self.number_of_particles
    }

    /// Get jitter
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Get initial observation noise variance
    pub fn observation_noise(&self) -> F {
        self.observation_noise
    }

    /// Get seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Get number of epochs
    pub fn number_of_epochs(&self) -> usize {
        self.number_of_epochs
    }

    /// Get learning rate search bounds (lower, upper)
    pub fn learning_rate_bounds(&self) -> (F, F) {
        (self.learning_rate_lower, self.learning_rate_upper)
    }

    /// Get number of learning rates tried per epoch
    pub fn number_of_learning_rate_searches(&self) -> usize {
        self.number_of_learning_rate_searches
    }

    /// Learning rates tried at each epoch, in increasing order
    pub fn learning_rates(&self) -> Result<Array1<F>> {
        Ok(learning_rate_grid(
            self.learning_rate_lower,
            self.learning_rate_upper,
            self.number_of_learning_rate_searches,
        )?)
    }

    /// Get maximum particle magnitude
    pub fn max_particle_magnitude(&self) -> F {
        self.max_particle_magnitude
    }

    /// Whether particles are recorded after each epoch
    pub fn record_trajectory(&self) -> bool {
        self.record_trajectory
    }

    /// Get validation data
    pub fn validation(&self) -> Option<&(Array2<F>, Array1<F>)> {
        self.validation.as_ref()
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [PWGF algorithm](crate::ProjectedWassersteinGradientFlow).
pub struct PwgfParams<F: Float, K: Kernel<F>>(PwgfValidParams<F, K>);

impl<F: Float, K: Kernel<F>> PwgfParams<F, K> {
    /// A constructor for PWGF parameters given a kernel and induce points
    pub fn new(kernel: GradientFlowKernel<F, K>, x_induce: Array2<F>) -> PwgfParams<F, K> {
        Self(PwgfValidParams {
            kernel,
            x_induce,
            number_of_particles: PWGF_DEFAULT_PARTICLES,
            jitter: F::cast(1e-6),
            observation_noise: F::one(),
            seed: 0,
            number_of_epochs: PWGF_DEFAULT_EPOCHS,
            learning_rate_lower: F::cast(1e-5),
            learning_rate_upper: F::cast(1e-1),
            number_of_learning_rate_searches: 10,
            max_particle_magnitude: F::cast(1e8),
            record_trajectory: false,
            validation: None,
        })
    }

    /// A constructor for PWGF parameters from validated parameters
    pub fn new_from_valid(params: &PwgfValidParams<F, K>) -> Self {
        Self(params.clone())
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: GradientFlowKernel<F, K>) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set induce points.
    pub fn x_induce(mut self, x_induce: Array2<F>) -> Self {
        self.0.x_induce = x_induce;
        self
    }

    /// Set number of particles.
    pub fn number_of_particles(mut self, number_of_particles: usize) -> Self {
        self.0.number_of_particles = number_of_particles;
        self
    }

    /// Set jitter added to the induce gram matrix.
    pub fn jitter(mut self, jitter: F) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Set observation noise variance.
    pub fn observation_noise(mut self, observation_noise: F) -> Self {
        self.0.observation_noise = observation_noise;
        self
    }

    /// Set the seed of the particle initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }

    /// Set number of epochs.
    pub fn number_of_epochs(mut self, number_of_epochs: usize) -> Self {
        self.0.number_of_epochs = number_of_epochs;
        self
    }

    /// Set learning rate search range and number of tried values.
    pub fn learning_rate_search(mut self, lower: F, upper: F, n_searches: usize) -> Self {
        self.0.learning_rate_lower = lower;
        self.0.learning_rate_upper = upper;
        self.0.number_of_learning_rate_searches = n_searches;
        self
    }

    /// Set maximum particle magnitude.
    pub fn max_particle_magnitude(mut self, max_particle_magnitude: F) -> Self {
        self.0.max_particle_magnitude = max_particle_magnitude;
        self
    }

    /// Record particles after each epoch.
    pub fn record_trajectory(mut self, record_trajectory: bool) -> Self {
        self.0.record_trajectory = record_trajectory;
        self
    }

    /// Set the data used to select learning rates.
    pub fn validation_data(mut self, x: Array2<F>, y: Array1<F>) -> Self {
        self.0.validation = Some((x, y));
        self
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for PwgfParams<F, K> {
    type Checked = PwgfValidParams<F, K>;
    type Error = FlowError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let params = &self.0;
        if params.x_induce.nrows() == 0 {
            return Err(FlowError::configuration(
                "Number of induce points should be positive",
            ));
        }
        if params.number_of_particles == 0 {
            return Err(FlowError::configuration(
                "Number of particles should be positive",
            ));
        }
        if !(params.jitter >= F::zero()) {
            return Err(FlowError::configuration(format!(
                "Jitter should be non negative, got {}",
                params.jitter
            )));
        }
        if !(params.observation_noise > F::zero()) || !params.observation_noise.is_finite() {
            return Err(FlowError::configuration(format!(
                "Observation noise should be positive, got {}",
                params.observation_noise
            )));
        }
        if !(params.max_particle_magnitude > F::zero()) {
            return Err(FlowError::configuration(format!(
                "Maximum particle magnitude should be positive, got {}",
                params.max_particle_magnitude
            )));
        }
        if let Some((x, y)) = &params.validation {
            if x.nrows() != y.len() || x.nrows() == 0 {
                return Err(FlowError::configuration(format!(
                    "Validation data should be non empty with as many targets as inputs, got {} inputs and {} targets",
                    x.nrows(),
                    y.len()
                )));
            }
            if x.ncols() != params.x_induce.ncols() {
                return Err(FlowError::configuration(format!(
                    "Validation inputs of dimension {} do not match induce points of dimension {}",
                    x.ncols(),
                    params.x_induce.ncols()
                )));
            }
        }
        params.learning_rates()?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
