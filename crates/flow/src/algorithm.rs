use crate::errors::{FlowError, Result};
use crate::kernel::GradientFlowKernel;
use crate::parameters::{PwgfParams, PwgfValidParams};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::goldensectionsearch::GoldenSectionSearch;
use linfa::prelude::{DatasetBase, Fit, Float};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use pwgf_gp::optimization::{argmin_finite, learning_rate_grid};
use pwgf_gp::utils::{cho_solve, cholesky_with_jitter};
use pwgf_gp::{GpModel, Kernel, MultivariateNormal};
use rand_xoshiro::Xoshiro256Plus;

use log::{debug, info, warn};
use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

/// Golden section refinement iterations of the observation noise search
const GOLDEN_SECTION_ITERATIONS: u64 = 40;
const GOLDEN_SECTION_TOLERANCE: f64 = 1e-10;

/// Diagnostics recorded along the flow, one entry per epoch
#[derive(Clone, Debug)]
pub struct FlowHistory<F: Float> {
    /// Selected learning rates
    pub learning_rates: Vec<F>,
    /// Validation negative log likelihood after the update
    pub losses: Vec<F>,
    /// Frobenius norm of the particle update
    pub update_magnitudes: Vec<F>,
    /// Particles after the update, when trajectory recording is enabled
    pub particles: Vec<Array2<F>>,
}

impl<F: Float> Default for FlowHistory<F> {
    fn default() -> Self {
        FlowHistory {
            learning_rates: Vec::new(),
            losses: Vec::new(),
            update_magnitudes: Vec::new(),
            particles: Vec::new(),
        }
    }
}

impl<F: Float> FlowHistory<F> {
    /// Number of recorded epochs
    pub fn len(&self) -> usize {
        self.learning_rates.len()
    }

    /// Whether no epoch was recorded
    pub fn is_empty(&self) -> bool {
        self.learning_rates.is_empty()
    }
}

/// Outcome of one line-searched flow step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome<F: Float> {
    /// Applied learning rate
    pub learning_rate: F,
    /// Validation negative log likelihood before the update
    pub previous_loss: F,
    /// Validation negative log likelihood after the update
    pub loss: F,
    /// Frobenius norm of the particle update
    pub update_magnitude: F,
    /// Whether some candidate improved on the previous loss
    pub improved: bool,
}

/// Rescale every particle (column) whose L2 norm exceeds `max_particle_magnitude`
/// to exactly that norm, keeping its direction
pub fn project_particles<F: Float>(mut particles: Array2<F>, max_particle_magnitude: F) -> Array2<F> {
    for mut particle in particles.columns_mut() {
        let norm = particle.dot(&particle).sqrt();
        if norm > max_particle_magnitude {
            let factor = max_particle_magnitude / norm;
            particle.mapv_inplace(|v| v * factor);
        }
    }
    particles
}

/// RBF kernel between particles `W_jk = exp(-|p_j - p_k|^2 / h)` with the median
/// heuristic bandwidth `h = med^2 / ln(K + 1)`, `h = 1` when degenerate
pub fn particle_kernel<F: Float>(particles: &ArrayBase<impl Data<Elem = F>, Ix2>) -> (Array2<F>, F) {
    let k = particles.ncols();
    let gram = particles.t().dot(particles);
    let norms = gram.diag().to_owned();
    let mut sq_dists = Array2::zeros((k, k));
    Zip::indexed(&mut sq_dists).for_each(|(i, j), d| {
        *d = (norms[i] + norms[j] - F::cast(2.) * gram[[i, j]]).max(F::zero());
    });

    let mut distances = Vec::with_capacity(k * k.saturating_sub(1) / 2);
    for i in 0..k {
        for j in (i + 1)..k {
            distances.push(sq_dists[[i, j]].sqrt());
        }
    }
    let bandwidth = match median(&mut distances) {
        Some(med) if med > F::zero() && med.is_finite() => {
            med * med / F::cast(k + 1).ln()
        }
        _ => F::one(),
    };
    (sq_dists.mapv(|d| (-d / bandwidth).exp()), bandwidth)
}

fn median<F: Float>(values: &mut [F]) -> Option<F> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / F::cast(2.))
    } else {
        Some(values[mid])
    }
}

/// Per-point mean and variance of particle predictions (n, K), variance divisor being `K - 1`
fn particle_moments<F: Float>(predictions: &Array2<F>) -> (Array1<F>, Array1<F>) {
    let k = predictions.ncols();
    let mean = predictions
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(predictions.nrows()));
    let var = if k > 1 {
        let centered = predictions - &mean.view().insert_axis(Axis(1));
        centered
            .mapv(|v| v * v)
            .sum_axis(Axis(1))
            .mapv(|v| v / F::cast(k - 1))
    } else {
        Array1::zeros(predictions.nrows())
    };
    (mean, var)
}

/// Mean gaussian negative log density of `y` with latent moments inflated by `noise`
fn gaussian_nll<F: Float>(
    mean: &Array1<F>,
    latent_var: &Array1<F>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    noise: F,
) -> F {
    let half = F::cast(0.5);
    let two_pi = F::cast(2. * std::f64::consts::PI);
    let total = Zip::from(mean)
        .and(latent_var)
        .and(y)
        .fold(F::zero(), |acc, &mu, &v, &yi| {
            let var = v + noise;
            let r = yi - mu;
            acc + half * (two_pi * var).ln() + half * r * r / var
        });
    total / F::cast(y.len())
}

/// Negative log likelihood of the observation noise given fixed particle moments,
/// minimized by argmin over the log noise
#[derive(Clone)]
struct LogNoiseNll<'a, F: Float> {
    mean: &'a Array1<F>,
    var: &'a Array1<F>,
    y: ArrayView1<'a, F>,
}

impl<'a, F: Float> LogNoiseNll<'a, F> {
    /// NaN is reported as infinite
    fn nll(&self, noise: F) -> F {
        let v = gaussian_nll(self.mean, self.var, &self.y, noise);
        if v.is_nan() {
            F::infinity()
        } else {
            v
        }
    }
}

impl<'a, F: Float> CostFunction for LogNoiseNll<'a, F> {
    type Param = f64;
    type Output = f64;

    fn cost(
        &self,
        log_noise: &Self::Param,
    ) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(to_f64(self.nll(F::cast(log_noise.exp()))))
    }
}

fn to_f64<F: Float>(v: F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Projected Wasserstein gradient flow (PWGF) approximation of GP regression
///
/// The approximate posterior is an empirical distribution over `K` particles, each particle being
/// the vector of function values at `M` induce points `Z`. A particle maps to any input `x`
/// by kernel interpolation `f(x) = k(x, Z) A^-1 p` with `A = K_ZZ + jitter I`.
///
/// Particles are drawn from the GP prior `N(0, A)` then moved along
///
/// `V = (-G W + A (2 / h) (P diag(W 1) - P W)) / K`
///
/// where `G = P - Φ(Z) Φ(X)^T (y 1^T - B P) / σ²` is the kernel-preconditioned gradient of the
/// negative log posterior (data fit through the Nyström features Φ of the [`GradientFlowKernel`],
/// `B = K_XZ A^-1`), and `W` is a RBF kernel between particles with median heuristic bandwidth `h`
/// whose gradient term repels particles from each other.
///
/// Each epoch tries a geometric grid of learning rates, keeps the one minimizing the validation
/// negative log likelihood and projects particles back onto the ball of radius
/// `max_particle_magnitude`.
///
/// # Example
///
/// ```
/// use linfa::prelude::{Dataset, Fit};
/// use ndarray::{Array, Axis};
/// use pwgf_flow::{GradientFlowKernel, ProjectedWassersteinGradientFlow};
/// use pwgf_gp::{GpModel, RbfKernel};
///
/// let xt = Array::linspace(-2., 2., 30).insert_axis(Axis(1));
/// let yt = xt.column(0).mapv(|v| v.sin());
/// let kernel = GradientFlowKernel::new(RbfKernel::new(1), xt.clone()).expect("kernel");
///
/// let pwgf = ProjectedWassersteinGradientFlow::params(kernel, xt.slice(ndarray::s![..;3, ..]).to_owned())
///     .number_of_particles(20)
///     .number_of_epochs(5)
///     .observation_noise(0.1)
///     .fit(&Dataset::new(xt.clone(), yt))
///     .expect("PWGF fitted");
///
/// let dist = pwgf.predict(&xt).expect("PWGF prediction");
/// assert_eq!(dist.mean().len(), 30);
/// ```
#[derive(Clone, Debug)]
pub struct ProjectedWassersteinGradientFlow<F: Float, K: Kernel<F>> {
    kernel: GradientFlowKernel<F, K>,
    /// (M, K) particle values at induce points
    particles: Array2<F>,
    x_induce: Array2<F>,
    x_train: Array2<F>,
    y_train: Array1<F>,
    observation_noise: F,
    jitter: F,
    /// `K_ZZ + jitter I`
    gram: Array2<F>,
    /// Lower cholesky factor of `gram`
    gram_chol: Array2<F>,
    /// `B = K_XZ A^-1` for training inputs
    train_projection: Array2<F>,
    /// `Φ(Z) Φ(X)^T` for training inputs
    fit_operator: Array2<F>,
    record_trajectory: bool,
    history: FlowHistory<F>,
}

impl<F: Float, K: Kernel<F>> fmt::Display for ProjectedWassersteinGradientFlow<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PWGF(kernel={}, particles={}, induce points={}, noise={})",
            self.kernel,
            self.number_of_particles(),
            self.x_induce.nrows(),
            self.observation_noise
        )
    }
}

impl<F: Float, K: Kernel<F>> ProjectedWassersteinGradientFlow<F, K> {
    /// PWGF parameters
    pub fn params(kernel: GradientFlowKernel<F, K>, x_induce: Array2<F>) -> PwgfParams<F, K> {
        PwgfParams::new(kernel, x_induce)
    }

    /// Flow whose `number_of_particles` particles are independent draws of the GP prior at
    /// the induce points, drawn with the given `seed`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number_of_particles: usize,
        kernel: GradientFlowKernel<F, K>,
        x_induce: Array2<F>,
        x_train: Array2<F>,
        y_train: Array1<F>,
        jitter: F,
        observation_noise: F,
        seed: u64,
    ) -> Result<Self> {
        if number_of_particles == 0 {
            return Err(FlowError::configuration(
                "Number of particles should be positive",
            ));
        }
        let mut flow = Self::build(
            kernel,
            x_induce,
            x_train,
            y_train,
            jitter,
            observation_noise,
        )?;
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let eps = Array2::<f64>::random_using(
            (flow.x_induce.nrows(), number_of_particles),
            StandardNormal,
            &mut rng,
        )
        .mapv(F::cast);
        flow.particles = flow.gram_chol.dot(&eps);
        Ok(flow)
    }

    /// Flow state without particles, caching every particle independent quantity
    pub(crate) fn build(
        kernel: GradientFlowKernel<F, K>,
        x_induce: Array2<F>,
        x_train: Array2<F>,
        y_train: Array1<F>,
        jitter: F,
        observation_noise: F,
    ) -> Result<Self> {
        if x_induce.nrows() == 0 {
            return Err(FlowError::configuration(
                "Number of induce points should be positive",
            ));
        }
        if x_train.nrows() == 0 || x_train.nrows() != y_train.len() {
            return Err(FlowError::configuration(format!(
                "Expected non empty training data with as many targets as inputs, got {} inputs and {} targets",
                x_train.nrows(),
                y_train.len()
            )));
        }
        if x_induce.ncols() != x_train.ncols() {
            return Err(FlowError::configuration(format!(
                "Induce points of dimension {} do not match training inputs of dimension {}",
                x_induce.ncols(),
                x_train.ncols()
            )));
        }
        if !(jitter >= F::zero()) {
            return Err(FlowError::configuration(format!(
                "Jitter should be non negative, got {}",
                jitter
            )));
        }
        check_noise(observation_noise)?;

        let kzz = kernel.evaluate(&x_induce, &x_induce);
        let gram_chol = cholesky_with_jitter(&kzz, jitter, "induce gram")?;
        let mut gram = kzz;
        gram.diag_mut().mapv_inplace(|v| v + jitter);
        let train_projection = Self::interpolation(&kernel, &gram_chol, &x_induce, &x_train)?;
        let fit_operator = kernel
            .features(&x_induce)?
            .dot(&kernel.features(&x_train)?.t());
        debug!(
            "PWGF state: {} induce points, {} training points",
            x_induce.nrows(),
            x_train.nrows()
        );
        Ok(ProjectedWassersteinGradientFlow {
            kernel,
            particles: Array2::zeros((x_induce.nrows(), 0)),
            x_induce,
            x_train,
            y_train,
            observation_noise,
            jitter,
            gram,
            gram_chol,
            train_projection,
            fit_operator,
            record_trajectory: false,
            history: FlowHistory::default(),
        })
    }

    /// `K_xZ A^-1`, the (n, M) map from particle values at induce points to values at `x`
    fn interpolation(
        kernel: &GradientFlowKernel<F, K>,
        gram_chol: &Array2<F>,
        x_induce: &Array2<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        if x.ncols() != x_induce.ncols() {
            return Err(FlowError::configuration(format!(
                "Expected inputs of dimension {}, got {}",
                x_induce.ncols(),
                x.ncols()
            )));
        }
        let kzx = kernel.evaluate(x_induce, x);
        Ok(cho_solve(gram_chol, &kzx)?.reversed_axes())
    }

    /// Kernel
    pub fn flow_kernel(&self) -> &GradientFlowKernel<F, K> {
        &self.kernel
    }

    /// Particles as a (number of induce points, number of particles) matrix
    pub fn particles(&self) -> &Array2<F> {
        &self.particles
    }

    /// Replace particles, the number of rows having to match the number of induce points
    pub fn set_particles(&mut self, particles: Array2<F>) -> Result<()> {
        self.check_particles(&particles.view())?;
        self.particles = particles;
        Ok(())
    }

    fn check_particles(&self, particles: &ArrayView2<F>) -> Result<()> {
        if particles.nrows() != self.x_induce.nrows() || particles.ncols() == 0 {
            return Err(FlowError::ParticleShapeError {
                expected: (self.x_induce.nrows(), particles.ncols().max(1)),
                actual: particles.dim(),
            });
        }
        Ok(())
    }

    /// Number of particles
    pub fn number_of_particles(&self) -> usize {
        self.particles.ncols()
    }

    /// Induce points
    pub fn x_induce(&self) -> &Array2<F> {
        &self.x_induce
    }

    /// Training inputs
    pub fn x_train(&self) -> &Array2<F> {
        &self.x_train
    }

    /// Training targets
    pub fn y_train(&self) -> &Array1<F> {
        &self.y_train
    }

    /// Jitter added to the induce gram matrix
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Set the observation noise variance
    pub fn set_observation_noise(&mut self, observation_noise: F) -> Result<()> {
        check_noise(observation_noise)?;
        self.observation_noise = observation_noise;
        Ok(())
    }

    /// Record particles after each epoch
    pub fn set_record_trajectory(&mut self, record_trajectory: bool) {
        self.record_trajectory = record_trajectory;
    }

    /// Diagnostics of the epochs run so far
    pub fn history(&self) -> &FlowHistory<F> {
        &self.history
    }

    /// Velocity of the flow for the given particles
    ///
    /// This is a pure function of the whole (M, K) particle matrix, every particle velocity
    /// depending on all particles through the particle kernel.
    pub fn velocity(&self, particles: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        self.check_particles(&particles.view())?;
        let k = F::cast(particles.ncols());
        let predictions = self.train_projection.dot(particles);
        let residuals = &self.y_train.view().insert_axis(Axis(1)) - &predictions;
        let data_fit = self
            .fit_operator
            .dot(&residuals)
            .mapv(|v| v / self.observation_noise);
        let energy_gradient = particles - &data_fit;

        let (w, bandwidth) = particle_kernel(particles);
        let w_sum = w.sum_axis(Axis(1));
        let repulsion =
            particles * &w_sum.view().insert_axis(Axis(0)) - particles.dot(&w);
        let scale = F::cast(2.) / bandwidth;
        let velocity = (self.gram.dot(&repulsion).mapv(|v| v * scale) - energy_gradient.dot(&w))
            .mapv(|v| v / k);

        if velocity.iter().any(|v| !v.is_finite()) {
            return Err(FlowError::numerical(
                "NaN or Inf detected in particle velocity",
            ));
        }
        Ok(velocity)
    }

    /// Apply `P <- project(P + learning_rate V)` and return the update magnitude
    pub fn step(&mut self, learning_rate: F, max_particle_magnitude: F) -> Result<F> {
        let velocity = self.velocity(&self.particles)?;
        let updated = self.moved(&velocity, learning_rate, max_particle_magnitude)?;
        let magnitude = frobenius_distance(&updated, &self.particles);
        self.particles = updated;
        Ok(magnitude)
    }

    fn moved(
        &self,
        velocity: &Array2<F>,
        learning_rate: F,
        max_particle_magnitude: F,
    ) -> Result<Array2<F>> {
        let candidate = &self.particles + &velocity.mapv(|v| v * learning_rate);
        let candidate = project_particles(candidate, max_particle_magnitude);
        if candidate.iter().any(|v| !v.is_finite()) {
            return Err(FlowError::numerical(
                "NaN or Inf detected in particle positions",
            ));
        }
        Ok(candidate)
    }

    /// One epoch: try every learning rate, keep the update minimizing the validation
    /// negative log likelihood (smaller rate on ties).
    ///
    /// Learning rates should be positive, finite and sorted in increasing order.
    /// When no candidate improves on the current loss, a convergence warning is logged and
    /// the smallest rate is applied.
    pub fn line_search_step(
        &mut self,
        learning_rates: &ArrayBase<impl Data<Elem = F>, Ix1>,
        max_particle_magnitude: F,
        x_validation: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y_validation: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<StepOutcome<F>> {
        if learning_rates.is_empty() {
            return Err(FlowError::configuration(
                "At least one learning rate should be tried",
            ));
        }
        let ascending = learning_rates
            .iter()
            .zip(learning_rates.iter().skip(1))
            .all(|(a, b)| a <= b);
        let positive = learning_rates
            .iter()
            .all(|lr| *lr > F::zero() && lr.is_finite());
        if !ascending || !positive {
            return Err(FlowError::configuration(format!(
                "Learning rates should be positive, finite and sorted in increasing order, got {}",
                learning_rates
            )));
        }
        let projection = self.validation_projection(x_validation, y_validation)?;
        let previous_loss = self.nll_with_projection(&projection, &self.particles, y_validation);
        let velocity = self.velocity(&self.particles)?;

        let mut candidates = Vec::with_capacity(learning_rates.len());
        let mut losses = Array1::from_elem(learning_rates.len(), F::infinity());
        for (i, &lr) in learning_rates.iter().enumerate() {
            let candidate = self.moved(&velocity, lr, max_particle_magnitude)?;
            let loss = self.nll_with_projection(&projection, &candidate, y_validation);
            losses[i] = if loss.is_nan() { F::infinity() } else { loss };
            candidates.push(candidate);
        }
        let best = argmin_finite(&losses);
        let improved = matches!(best, Some(i) if losses[i] < previous_loss);
        let chosen = match best {
            Some(i) if improved => i,
            _ => {
                warn!(
                    "ConvergenceWarning: no learning rate in [{}, {}] improves validation loss {}, using {}",
                    learning_rates[0],
                    learning_rates[learning_rates.len() - 1],
                    previous_loss,
                    learning_rates[0]
                );
                0
            }
        };

        let updated = candidates.swap_remove(chosen);
        let update_magnitude = frobenius_distance(&updated, &self.particles);
        self.particles = updated;
        let outcome = StepOutcome {
            learning_rate: learning_rates[chosen],
            previous_loss,
            loss: losses[chosen],
            update_magnitude,
            improved,
        };
        self.history.learning_rates.push(outcome.learning_rate);
        self.history.losses.push(outcome.loss);
        self.history.update_magnitudes.push(update_magnitude);
        if self.record_trajectory {
            self.history.particles.push(self.particles.to_owned());
        }
        Ok(outcome)
    }

    fn validation_projection(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Array2<F>> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(FlowError::configuration(format!(
                "Expected non empty data with as many targets as inputs, got {} inputs and {} targets",
                x.nrows(),
                y.len()
            )));
        }
        Self::interpolation(&self.kernel, &self.gram_chol, &self.x_induce, x)
    }

    fn nll_with_projection(
        &self,
        projection: &Array2<F>,
        particles: &Array2<F>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        let (mean, var) = particle_moments(&projection.dot(particles));
        gaussian_nll(&mean, &var, y, self.observation_noise)
    }

    /// Function values of every particle at `x`, a (n, K) matrix `K_xZ A^-1 P`
    pub fn particle_predictions(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        let projection = Self::interpolation(&self.kernel, &self.gram_chol, &self.x_induce, x)?;
        Ok(projection.dot(&self.particles))
    }

    /// Mean negative log density of `y` under the predictive marginals at `x`
    pub fn negative_log_likelihood(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<F> {
        let projection = self.validation_projection(x, y)?;
        Ok(self.nll_with_projection(&projection, &self.particles, y))
    }

    /// Search the observation noise minimizing the negative log likelihood of `(x, y)`
    /// with particles held fixed
    ///
    /// A geometric grid of `number_of_searches` values in `[lower, upper]` is evaluated, then
    /// the best grid value is refined by golden section search in log space between its grid
    /// neighbours. The refined value is kept only when it improves on the best grid value.
    /// The result overwrites the stored observation noise and is returned.
    pub fn observation_noise_search(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        lower: F,
        upper: F,
        number_of_searches: usize,
    ) -> Result<F> {
        let grid = learning_rate_grid(lower, upper, number_of_searches).map_err(|_| {
            FlowError::configuration(format!(
                "Noise search expects 0 < lower <= upper and a positive number of searches, got ({}, {}, {})",
                lower, upper, number_of_searches
            ))
        })?;
        let projection = self.validation_projection(x, y)?;
        let (mean, var) = particle_moments(&projection.dot(&self.particles));
        let cost = LogNoiseNll {
            mean: &mean,
            var: &var,
            y: y.view(),
        };
        let nll = |noise: F| cost.nll(noise);

        let losses = grid.mapv(&nll);
        let best = argmin_finite(&losses).ok_or_else(|| {
            FlowError::numerical("Negative log likelihood is not finite on the noise grid")
        })?;
        let n = grid.len();
        let (lo, up) = if n == 1 {
            (lower, upper)
        } else {
            (grid[best.saturating_sub(1)], grid[(best + 1).min(n - 1)])
        };
        let (lo, up) = (to_f64(lo.ln()), to_f64(up.ln()));
        let refined = if up > lo {
            let init = to_f64(grid[best].ln()).max(lo).min(up);
            let solver =
                GoldenSectionSearch::new(lo, up)?.with_tolerance(GOLDEN_SECTION_TOLERANCE)?;
            let res = Executor::new(cost.clone(), solver)
                .configure(|state| state.param(init).max_iters(GOLDEN_SECTION_ITERATIONS))
                .run()?;
            debug!(
                "Golden section search over log noise [{}, {}]: {} iterations, best nll={}",
                lo,
                up,
                res.state().get_iter(),
                res.state().get_best_cost()
            );
            let log_noise = res.state().get_best_param().copied().unwrap_or(init);
            F::cast(log_noise.exp()).max(lower).min(upper)
        } else {
            grid[best]
        };
        let noise = if nll(refined) < losses[best] {
            refined
        } else {
            grid[best]
        };
        info!(
            "PWGF observation noise search: noise={} (nll={}, best grid value {} with nll={})",
            noise,
            nll(noise),
            grid[best],
            losses[best]
        );
        self.observation_noise = noise;
        Ok(noise)
    }

    /// Run `number_of_epochs` line-searched flow steps
    pub fn optimise(
        &mut self,
        number_of_epochs: usize,
        learning_rates: &ArrayBase<impl Data<Elem = F>, Ix1>,
        max_particle_magnitude: F,
        x_validation: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y_validation: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        let now = Instant::now();
        for epoch in 0..number_of_epochs {
            let outcome = self.line_search_step(
                learning_rates,
                max_particle_magnitude,
                x_validation,
                y_validation,
            )?;
            debug!(
                "PWGF epoch {}: lr={} loss={} update={}",
                epoch, outcome.learning_rate, outcome.loss, outcome.update_magnitude
            );
        }
        info!(
            "PWGF {} epochs done ({:?}), validation loss={:?}",
            number_of_epochs,
            now.elapsed(),
            self.history.losses.last()
        );
        Ok(())
    }
}

fn check_noise<F: Float>(observation_noise: F) -> Result<()> {
    if !(observation_noise > F::zero()) || !observation_noise.is_finite() {
        return Err(FlowError::configuration(format!(
            "Observation noise should be positive, got {}",
            observation_noise
        )));
    }
    Ok(())
}

fn frobenius_distance<F: Float>(a: &Array2<F>, b: &Array2<F>) -> F {
    Zip::from(a)
        .and(b)
        .fold(F::zero(), |acc, &x, &y| acc + (x - y) * (x - y))
        .sqrt()
}

impl<F: Float, K: Kernel<F>> GpModel<F> for ProjectedWassersteinGradientFlow<F, K> {
    type Kern = GradientFlowKernel<F, K>;

    fn kernel(&self) -> &Self::Kern {
        &self.kernel
    }

    fn observation_noise(&self) -> F {
        self.observation_noise
    }

    /// Empirical moments of the particle population at `x`
    fn predict_latent(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> pwgf_gp::Result<MultivariateNormal<F>> {
        let predictions = self.particle_predictions(x)?;
        let k = predictions.ncols();
        let (mean, _) = particle_moments(&predictions);
        let covariance = if k > 1 {
            let centered = &predictions - &mean.view().insert_axis(Axis(1));
            centered.dot(&centered.t()).mapv(|v| v / F::cast(k - 1))
        } else {
            Array2::zeros((x.nrows(), x.nrows()))
        };
        MultivariateNormal::new(mean, covariance)
    }
}

impl<F: Float, K: Kernel<F>, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, FlowError>
    for PwgfValidParams<F, K>
{
    type Object = ProjectedWassersteinGradientFlow<F, K>;

    /// Initialize particles from the GP prior and run the flow on the training dataset
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        let mut flow = ProjectedWassersteinGradientFlow::new(
            self.number_of_particles(),
            self.kernel().clone(),
            self.x_induce().to_owned(),
            x.to_owned(),
            y.to_owned(),
            self.jitter(),
            self.observation_noise(),
            self.seed(),
        )?;
        flow.set_record_trajectory(self.record_trajectory());
        let rates = self.learning_rates()?;
        let (x_val, y_val): (ArrayView2<F>, ArrayView1<F>) = match self.validation() {
            Some((xv, yv)) => (xv.view(), yv.view()),
            None => (x.view(), y.view()),
        };
        flow.optimise(
            self.number_of_epochs(),
            &rates,
            self.max_particle_magnitude(),
            &x_val,
            &y_val,
        )?;
        Ok(flow)
    }
}

impl<F: Float, K: Kernel<F>> ProjectedWassersteinGradientFlow<F, K> {
    /// Build a flow from existing particles
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_particles(
        particles: Array2<F>,
        kernel: GradientFlowKernel<F, K>,
        x_induce: Array2<F>,
        x_train: Array2<F>,
        y_train: Array1<F>,
        jitter: F,
        observation_noise: F,
    ) -> Result<Self> {
        let mut flow = Self::build(kernel, x_induce, x_train, y_train, jitter, observation_noise)?;
        flow.set_particles(particles)?;
        Ok(flow)
    }
}
