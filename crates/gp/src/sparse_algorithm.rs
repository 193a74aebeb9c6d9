use crate::distribution::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::model::GpModel;
use crate::optimization::{argmin_finite, learning_rate_grid, Adam};
use crate::sparse_parameters::{Inducings, ParamTuning, SvgpParams, SvgpValidParams};
use crate::utils::cholesky_with_jitter;
use finitediff::FiniteDiff;
use linfa::prelude::{DatasetBase, Fit, Float};
use linfa_linalg::triangular::*;
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use log::{debug, info, warn};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Whitened variational distribution `q(v) = N(m, L L^T)` with `u = chol(Kzz) v`,
/// together with the constant mean of the model.
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
#[derive(Debug)]
pub(crate) struct VariationalState<F: Float> {
    mean: Array1<F>,
    chol: Array2<F>,
    constant_mean: F,
}

impl<F: Float> Clone for VariationalState<F> {
    fn clone(&self) -> Self {
        VariationalState {
            mean: self.mean.to_owned(),
            chol: self.chol.to_owned(),
            constant_mean: self.constant_mean,
        }
    }
}

impl<F: Float> VariationalState<F> {
    /// Whitened prior `N(0, I)`
    fn prior(n_inducings: usize) -> Self {
        VariationalState {
            mean: Array1::zeros(n_inducings),
            chol: Array2::eye(n_inducings),
            constant_mean: F::zero(),
        }
    }

    fn n_inducings(&self) -> usize {
        self.mean.len()
    }

    fn to_flat(&self) -> Array1<F> {
        let m = self.n_inducings();
        let mut flat = Array1::zeros(m + m * m + 1);
        flat.slice_mut(s![..m]).assign(&self.mean);
        flat.slice_mut(s![m..m + m * m])
            .assign(&Array1::from_iter(self.chol.iter().cloned()));
        flat[m + m * m] = self.constant_mean;
        flat
    }

    fn from_flat(flat: &Array1<F>, m: usize) -> Result<Self> {
        let chol = Array2::from_shape_vec((m, m), flat.slice(s![m..m + m * m]).to_vec())
            .map_err(|e| GpError::ConfigurationError(e.to_string()))?;
        Ok(VariationalState {
            mean: flat.slice(s![..m]).to_owned(),
            chol,
            constant_mean: flat[m + m * m],
        })
    }

    /// `0.5 * (tr(S) + m.m - M - ln det S)`
    fn kl_divergence(&self) -> F {
        let half = F::cast(0.5);
        let trace = self.chol.mapv(|v| v * v).sum();
        let mm = self.mean.dot(&self.mean);
        let log_det = self
            .chol
            .diag()
            .fold(F::zero(), |acc, &v| acc + (v * v).ln());
        half * (trace + mm - F::cast(self.n_inducings()) - log_det)
    }
}

/// Variational gradients of the normalized negative ELBO on a mini-batch
struct BatchGradient<F: Float> {
    loss: F,
    /// Gradient with respect to the flat variational state
    grad: Array1<F>,
}

/// Kernel, likelihood and inducing points of a svGP, the quantities learned by
/// finite differences during training
#[derive(Clone, Debug)]
struct SvgpHyperparameters<F: Float, K: Kernel<F>> {
    kernel: K,
    noise: F,
    z: Array2<F>,
}

impl<F: Float, K: Kernel<F>> SvgpHyperparameters<F, K> {
    /// Cholesky factor of `Kzz + jitter I` and whitened projection `Lzz^-1 Kzx`
    fn projection(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        jitter: F,
    ) -> Result<Array2<F>> {
        let kzz = self.kernel.evaluate(&self.z, &self.z);
        let lzz = cholesky_with_jitter(&kzz, jitter, "svGP inducing covariance")?;
        let kzx = self.kernel.evaluate(&self.z, x);
        Ok(lzz.solve_triangular(&kzx, UPLO::Lower)?)
    }

    /// Normalized negative ELBO of a mini-batch, the expected log likelihood being
    /// rescaled to the `n_total` training points
    fn batch_loss(
        &self,
        state: &VariationalState<F>,
        xb: &ArrayBase<impl Data<Elem = F>, Ix2>,
        yb: &ArrayBase<impl Data<Elem = F>, Ix1>,
        n_total: usize,
        jitter: F,
    ) -> Result<(F, Array2<F>, Array1<F>)> {
        let a = self.projection(xb, jitter)?;
        let mu = a.t().dot(&state.mean).mapv(|v| v + state.constant_mean);
        let lta = state.chol.t().dot(&a);
        let kdiag = self.kernel.diag(xb);
        let var = Zip::from(&kdiag)
            .and(a.columns())
            .and(lta.columns())
            .map_collect(|&k, ai, li| (k - ai.dot(&ai) + li.dot(&li)).max(F::zero()));
        let resid = yb - &mu;

        let half = F::cast(0.5);
        let log_two_pi_noise = (F::cast(2. * std::f64::consts::PI) * self.noise).ln();
        let ell = Zip::from(&resid).and(&var).fold(F::zero(), |acc, &r, &v| {
            acc - half * log_two_pi_noise - (r * r + v) / (F::cast(2.) * self.noise)
        });
        let n = F::cast(n_total);
        let scale = n / F::cast(xb.nrows());
        let loss = -(scale * ell - state.kl_divergence()) / n;
        Ok((loss, a, resid))
    }

    /// Batch loss with its analytic gradient with respect to the variational state
    fn batch_gradient(
        &self,
        state: &VariationalState<F>,
        xb: &ArrayBase<impl Data<Elem = F>, Ix2>,
        yb: &ArrayBase<impl Data<Elem = F>, Ix1>,
        n_total: usize,
        jitter: F,
    ) -> Result<BatchGradient<F>> {
        let (loss, a, resid) = self.batch_loss(state, xb, yb, n_total, jitter)?;
        let m = state.n_inducings();
        let n = F::cast(n_total);
        let scale = F::cast(n_total) / F::cast(xb.nrows());
        let w = scale / self.noise;

        let g_mean = (&state.mean - &a.dot(&resid).mapv(|v| v * w)) / n;
        let mut g_chol = a.dot(&a.t()).dot(&state.chol).mapv(|v| v * w) + &state.chol;
        Zip::indexed(&mut g_chol).for_each(|(i, j), g| {
            if j > i {
                *g = F::zero();
            } else if i == j {
                *g -= F::one() / state.chol[[i, i]];
            }
        });
        let g_chol = g_chol / n;
        let g_constant = -resid.sum() * w / n;

        let mut grad = Array1::zeros(m + m * m + 1);
        grad.slice_mut(s![..m]).assign(&g_mean);
        grad.slice_mut(s![m..m + m * m])
            .assign(&Array1::from_iter(g_chol.iter().cloned()));
        grad[m + m * m] = g_constant;
        Ok(BatchGradient { loss, grad })
    }
}

/// Layout of the vector of parameters learned by finite differences
#[derive(Clone, Copy, Debug)]
struct HyperLayout {
    n_kernel: usize,
    learn_noise: bool,
    learn_z: bool,
    z_shape: (usize, usize),
}

impl HyperLayout {
    fn pack<F: Float, K: Kernel<F>>(&self, hyper: &SvgpHyperparameters<F, K>) -> Array1<F> {
        let mut flat = hyper.kernel.hyperparameters().to_vec();
        if self.learn_noise {
            flat.push(GaussianLikelihood::new(hyper.noise).map_or(F::zero(), |l| l.raw_noise()));
        }
        if self.learn_z {
            flat.extend(hyper.z.iter().cloned());
        }
        Array1::from_vec(flat)
    }

    fn unpack<F: Float, K: Kernel<F>>(
        &self,
        flat: &ArrayBase<impl Data<Elem = F>, Ix1>,
        template: &SvgpHyperparameters<F, K>,
    ) -> Result<SvgpHyperparameters<F, K>> {
        let mut hyper = template.clone();
        hyper
            .kernel
            .set_hyperparameters(&flat.slice(s![..self.n_kernel]))?;
        let mut offset = self.n_kernel;
        if self.learn_noise {
            hyper.noise = GaussianLikelihood::from_raw_noise(flat[offset]).noise();
            offset += 1;
        }
        if self.learn_z {
            hyper.z = Array2::from_shape_vec(self.z_shape, flat.slice(s![offset..]).to_vec())
                .map_err(|e| GpError::ConfigurationError(e.to_string()))?;
        }
        Ok(hyper)
    }
}

fn to_f64<F: Float>(v: F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Sparse variational gaussian process (svGP)
///
/// `M` inducing points `Z` summarize the training set. The variational distribution over
/// the inducing values is whitened (`u = chol(Kzz) v`, `q(v) = N(m, L L^T)`) and initialized
/// at the prior `m = 0, L = I`.
///
/// Training maximizes the evidence lower bound (ELBO) with Adam on shuffled mini-batches:
/// * `m`, `L` and the constant mean use analytic gradients,
/// * kernel hyperparameters, noise variance (unless fixed) and inducing locations
///   (unless frozen with `is_fixed`) use central finite differences.
///
/// The learning rate is chosen by training one model per rate of a log-spaced grid and keeping
/// the one with the lowest final loss, ties going to the smaller rate.
///
/// # Example
///
/// ```
/// use linfa::prelude::{Dataset, Fit};
/// use ndarray::{Array, Axis};
/// use pwgf_gp::{GpModel, Inducings, RbfKernel, SparseVariationalGp};
///
/// let xt = Array::linspace(-2., 2., 40).insert_axis(Axis(1));
/// let yt = xt.column(0).mapv(|v| v.sin());
///
/// let svgp = SparseVariationalGp::params(RbfKernel::new(1), Inducings::Randomized(8))
///     .n_epochs(5)
///     .batch_size(16)
///     .seed(Some(42))
///     .fit(&Dataset::new(xt.clone(), yt))
///     .expect("svGP fitted");
///
/// let dist = svgp.predict(&xt).expect("svGP prediction");
/// assert_eq!(dist.mean().len(), 40);
/// ```
///
/// # Reference
///
/// James Hensman, Nicolo Fusi, Neil D. Lawrence.
/// [Gaussian Processes for Big Data](https://arxiv.org/abs/1309.6835).
/// In: Uncertainty in Artificial Intelligence, 2013
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct SparseVariationalGp<F: Float, K: Kernel<F>> {
    kernel: K,
    likelihood: GaussianLikelihood<F>,
    inducings: Array2<F>,
    /// Lower cholesky factor of `Kzz + jitter I`
    inducing_chol: Array2<F>,
    variational: VariationalState<F>,
    jitter: F,
    learning_rate: Option<F>,
    losses: Vec<F>,
}

impl<F: Float, K: Kernel<F>> Clone for SparseVariationalGp<F, K> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            likelihood: self.likelihood,
            inducings: self.inducings.to_owned(),
            inducing_chol: self.inducing_chol.to_owned(),
            variational: self.variational.clone(),
            jitter: self.jitter,
            learning_rate: self.learning_rate,
            losses: self.losses.clone(),
        }
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for SparseVariationalGp<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SVGP(kernel={}, likelihood={}, inducings={})",
            self.kernel,
            self.likelihood,
            self.inducings.nrows()
        )
    }
}

impl<F: Float, K: Kernel<F>> SparseVariationalGp<F, K> {
    /// svGP parameters
    pub fn params(kernel: K, inducings: Inducings<F>) -> SvgpParams<F, K> {
        SvgpParams::new(kernel, inducings)
    }

    /// Untrained svGP whose variational distribution is the whitened prior
    pub fn new(
        kernel: K,
        likelihood: GaussianLikelihood<F>,
        inducings: Array2<F>,
        jitter: F,
    ) -> Result<Self> {
        if inducings.nrows() == 0 {
            return Err(GpError::ConfigurationError(
                "Number of inducing points should be positive".to_string(),
            ));
        }
        let kzz = kernel.evaluate(&inducings, &inducings);
        let inducing_chol = cholesky_with_jitter(&kzz, jitter, "svGP inducing covariance")?;
        let variational = VariationalState::prior(inducings.nrows());
        Ok(SparseVariationalGp {
            kernel,
            likelihood,
            inducings,
            inducing_chol,
            variational,
            jitter,
            learning_rate: None,
            losses: Vec::new(),
        })
    }

    /// Replace the whitened variational distribution by `N(mean, chol chol^T)` and set the constant mean
    pub fn with_variational_distribution(
        mut self,
        mean: Array1<F>,
        chol: Array2<F>,
        constant_mean: F,
    ) -> Result<Self> {
        let m = self.inducings.nrows();
        if mean.len() != m || chol.shape() != [m, m] {
            return Err(GpError::ConfigurationError(format!(
                "Variational distribution should have shapes ({},) and ({}, {}), got {:?} and {:?}",
                m,
                m,
                m,
                mean.shape(),
                chol.shape()
            )));
        }
        self.variational = VariationalState {
            mean,
            chol,
            constant_mean,
        };
        Ok(self)
    }

    /// Gaussian likelihood
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Inducing points
    pub fn inducings(&self) -> &Array2<F> {
        &self.inducings
    }

    /// Whitened variational mean
    pub fn variational_mean(&self) -> &Array1<F> {
        &self.variational.mean
    }

    /// Lower cholesky factor of the whitened variational covariance
    pub fn variational_chol(&self) -> &Array2<F> {
        &self.variational.chol
    }

    /// Constant mean
    pub fn constant_mean(&self) -> F {
        self.variational.constant_mean
    }

    /// Learning rate selected during training
    pub fn learning_rate(&self) -> Option<F> {
        self.learning_rate
    }

    /// Normalized negative ELBO on the whole training set after each epoch
    pub fn losses(&self) -> &[F] {
        &self.losses
    }
}

impl<F: Float, K: Kernel<F>> GpModel<F> for SparseVariationalGp<F, K> {
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
        if x.ncols() != self.inducings.ncols() {
            return Err(GpError::ConfigurationError(format!(
                "Expected inputs of dimension {}, got {}",
                self.inducings.ncols(),
                x.ncols()
            )));
        }
        let kzx = self.kernel.evaluate(&self.inducings, x);
        let a = self.inducing_chol.solve_triangular(&kzx, UPLO::Lower)?;
        let mean = a
            .t()
            .dot(&self.variational.mean)
            .mapv(|v| v + self.variational.constant_mean);
        let lta = self.variational.chol.t().dot(&a);
        let mut covariance = self.kernel.evaluate(x, x) - a.t().dot(&a) + lta.t().dot(&lta);
        covariance.diag_mut().mapv_inplace(|v| v + self.jitter);
        MultivariateNormal::new(mean, covariance)
    }
}

/// Outcome of training with one learning rate
struct Candidate<F: Float, K: Kernel<F>> {
    hyper: SvgpHyperparameters<F, K>,
    state: VariationalState<F>,
    losses: Vec<F>,
}

impl<F: Float, K: Kernel<F>> SvgpValidParams<F, K> {
    #[allow(clippy::too_many_arguments)]
    fn train_candidate(
        &self,
        learning_rate: F,
        init: &SvgpHyperparameters<F, K>,
        layout: HyperLayout,
        x: &ArrayView2<F>,
        y: &ArrayView1<F>,
        seed: u64,
    ) -> Result<Candidate<F, K>> {
        let n = x.nrows();
        let m = init.z.nrows();
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let mut state = VariationalState::prior(m);
        let mut hyper = init.clone();
        let mut var_flat = state.to_flat();
        let mut hyper_flat = layout.pack(&hyper);
        let mut var_adam = Adam::new(var_flat.len(), learning_rate);
        let mut hyper_adam = Adam::new(hyper_flat.len(), learning_rate);
        let mut indices = (0..n).collect::<Vec<_>>();
        let mut losses = Vec::with_capacity(self.n_epochs());

        for epoch in 0..self.n_epochs() {
            indices.shuffle(&mut rng);
            for batch in indices.chunks(self.batch_size()) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let bg = hyper.batch_gradient(&state, &xb, &yb, n, self.jitter())?;

                let objective = |h: &Vec<f64>| -> f64 {
                    let h = Array1::from_iter(h.iter().map(|v| F::cast(*v)));
                    layout
                        .unpack(&h, &hyper)
                        .and_then(|hp| hp.batch_loss(&state, &xb, &yb, n, self.jitter()))
                        .map_or(f64::NAN, |(loss, _, _)| to_f64(loss))
                };
                let hyper_grad = Array1::from_iter(
                    hyper_flat
                        .iter()
                        .map(|v| to_f64(*v))
                        .collect::<Vec<f64>>()
                        .central_diff(&objective)
                        .into_iter()
                        .map(F::cast),
                );

                var_adam.step(&mut var_flat, &bg.grad)?;
                hyper_adam.step(&mut hyper_flat, &hyper_grad)?;
                state = VariationalState::from_flat(&var_flat, m)?;
                hyper = layout.unpack(&hyper_flat, &hyper)?;
            }
            let (loss, _, _) = hyper.batch_loss(&state, x, y, n, self.jitter())?;
            debug!("svGP lr={} epoch {} loss={}", learning_rate, epoch, loss);
            losses.push(loss);
        }
        Ok(Candidate {
            hyper,
            state,
            losses,
        })
    }
}

impl<F: Float, K: Kernel<F>, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError>
    for SvgpValidParams<F, K>
{
    type Object = SparseVariationalGp<F, K>;

    /// Fit svGP by mini-batch ELBO maximization with a learning rate search
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
            if dim != x.ncols() {
                return Err(GpError::ConfigurationError(format!(
                    "Expected inputs of dimension {}, got {}",
                    dim,
                    x.ncols()
                )));
            }
        }

        let seed = match self.seed() {
            Some(seed) => *seed,
            None => Xoshiro256Plus::from_entropy().next_u64(),
        };
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let z = match self.inducings() {
            Inducings::Randomized(n) => make_inducings(*n, &x.view(), &mut rng),
            Inducings::Located(z) => {
                if z.ncols() != x.ncols() {
                    return Err(GpError::ConfigurationError(format!(
                        "Inducing points of dimension {} do not match inputs of dimension {}",
                        z.ncols(),
                        x.ncols()
                    )));
                }
                z.to_owned()
            }
        };
        let (learn_noise, noise) = match self.noise_variance() {
            ParamTuning::Fixed(c) => (false, *c),
            ParamTuning::Optimized(c) => (true, *c),
        };
        let init = SvgpHyperparameters {
            kernel: self.kernel().clone(),
            noise,
            z,
        };

        if self.n_epochs() == 0 {
            return SparseVariationalGp::new(
                init.kernel,
                GaussianLikelihood::new(init.noise)?,
                init.z,
                self.jitter(),
            );
        }

        let layout = HyperLayout {
            n_kernel: init.kernel.n_hyperparameters(),
            learn_noise,
            learn_z: !self.is_fixed(),
            z_shape: init.z.dim(),
        };
        let (lower, upper) = self.learning_rate_bounds();
        let rates = learning_rate_grid(lower, upper, self.n_learning_rate_searches())?;
        let batch_seed = rng.next_u64();

        let now = Instant::now();
        let mut candidates = Vec::with_capacity(rates.len());
        for &lr in rates.iter() {
            match self.train_candidate(lr, &init, layout, &x.view(), &y.view(), batch_seed) {
                Ok(candidate) => candidates.push(Some(candidate)),
                Err(err) => {
                    warn!("svGP training with learning rate {} failed: {}", lr, err);
                    candidates.push(None)
                }
            }
        }
        let final_losses = Array1::from_iter(candidates.iter().map(|c| {
            c.as_ref()
                .and_then(|c| c.losses.last().cloned())
                .unwrap_or(F::infinity())
        }));
        let best = argmin_finite(&final_losses).ok_or_else(|| {
            GpError::NumericalError(
                "svGP training failed for every learning rate candidate".to_string(),
            )
        })?;
        let Candidate {
            hyper,
            state,
            losses,
        } = candidates
            .swap_remove(best)
            .ok_or_else(|| GpError::NumericalError("svGP best candidate missing".to_string()))?;
        info!(
            "svGP trained with learning rate {} ({:?}), final loss={}",
            rates[best],
            now.elapsed(),
            final_losses[best]
        );

        let mut svgp = SparseVariationalGp::new(
            hyper.kernel,
            GaussianLikelihood::new(hyper.noise)?,
            hyper.z,
            self.jitter(),
        )?
        .with_variational_distribution(state.mean, state.chol, state.constant_mean)?;
        svgp.learning_rate = Some(rates[best]);
        svgp.losses = losses;
        Ok(svgp)
    }
}

/// `n_inducing` distinct rows of `xt` drawn without replacement, all rows when `xt` has fewer
fn make_inducings<F: Float>(
    n_inducing: usize,
    xt: &ArrayView2<F>,
    rng: &mut Xoshiro256Plus,
) -> Array2<F> {
    let mut indices = (0..xt.nrows()).collect::<Vec<_>>();
    indices.shuffle(rng);
    let n = n_inducing.min(xt.nrows());
    let mut z = Array2::zeros((n, xt.ncols()));
    let idx = indices[..n].to_vec();
    Zip::from(z.rows_mut())
        .and(&Array1::from_vec(idx))
        .for_each(|mut zi, i| zi.assign(&xt.row(*i)));
    z
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{LinearKernel, RbfKernel};
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use ndarray::{array, Array};

    fn sine_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let xt = Array::linspace(-2., 2., n).insert_axis(Axis(1));
        let yt = xt.column(0).mapv(|v| (2. * v).sin());
        (xt, yt)
    }

    #[test]
    fn test_prior_predictive_covariance() {
        let z = array![
            [1.1, 3.5, 3.5],
            [1.3, 7.5, 1.5],
            [2.5, 2.5, 0.5],
            [1.0, 2.0, 3.0],
            [1.5, 2.5, 3.5]
        ];
        let svgp = SparseVariationalGp::new(
            LinearKernel::default(),
            GaussianLikelihood::default(),
            z,
            1e-4,
        )
        .unwrap();
        let x = array![[3.2, 4.2, 4.0], [5.1, 2.1, 9.5]];
        let latent = svgp.predict_latent(&x).unwrap();
        let kxx = array![[43.88 + 1e-4, 63.14], [63.14, 120.67 + 1e-4]];
        assert_abs_diff_eq!(*latent.covariance(), kxx, epsilon = 1e-8);
        assert_abs_diff_eq!(*latent.mean(), array![0., 0.], epsilon = 1e-12);
    }

    #[test]
    fn test_variational_gradient() {
        let (xt, yt) = sine_data(12);
        let hyper = SvgpHyperparameters {
            kernel: RbfKernel::from_params(1.2, array![0.8]).unwrap(),
            noise: 0.3,
            z: array![[-1.5], [0.0], [1.2]],
        };
        let state = VariationalState {
            mean: array![0.2, -0.4, 0.7],
            chol: array![[0.9, 0., 0.], [0.1, 0.8, 0.], [-0.2, 0.3, 1.1]],
            constant_mean: 0.05,
        };
        let bg = hyper.batch_gradient(&state, &xt, &yt, 30, 1e-6).unwrap();
        let flat = state.to_flat();
        let h = 1e-6;
        for i in 0..flat.len() {
            if (3..12).contains(&i) && (i - 3) % 3 > (i - 3) / 3 {
                assert_eq!(bg.grad[i], 0.);
                continue;
            }
            let mut up = flat.clone();
            up[i] += h;
            let mut down = flat.clone();
            down[i] -= h;
            let loss = |f: &Array1<f64>| {
                let s = VariationalState::from_flat(f, 3).unwrap();
                hyper.batch_loss(&s, &xt, &yt, 30, 1e-6).unwrap().0
            };
            let fd = (loss(&up) - loss(&down)) / (2. * h);
            assert_abs_diff_eq!(bg.grad[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_svgp_training() {
        let (xt, yt) = sine_data(40);
        let svgp = SparseVariationalGp::params(RbfKernel::new(1), Inducings::Randomized(10))
            .n_epochs(50)
            .batch_size(20)
            .learning_rate_search(1e-2, 1e-1, 2)
            .seed(Some(42))
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("svGP fit error");
        let losses = svgp.losses();
        assert_eq!(losses.len(), 50);
        assert!(losses[49] < losses[0]);
        assert!(svgp.learning_rate().is_some());
        let dist = svgp.predict(&xt).unwrap();
        let mse = (dist.mean() - &yt).mapv(|v| v * v).mean().unwrap();
        assert!(mse < 0.25, "mse={}", mse);
    }

    #[test]
    fn test_svgp_fixed_inducings_and_noise() {
        let (xt, yt) = sine_data(20);
        let z = array![[-1.5], [-0.5], [0.5], [1.5]];
        let svgp = SparseVariationalGp::params(RbfKernel::new(1), Inducings::Located(z.clone()))
            .is_fixed(true)
            .noise_variance(ParamTuning::Fixed(0.05))
            .n_epochs(3)
            .batch_size(8)
            .learning_rate_search(1e-2, 1e-2, 1)
            .seed(Some(0))
            .fit(&Dataset::new(xt, yt))
            .expect("svGP fit error");
        assert_eq!(*svgp.inducings(), z);
        assert_abs_diff_eq!(svgp.observation_noise(), 0.05);
    }

    #[test]
    fn test_make_inducings() {
        let (xt, _) = sine_data(12);
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let z = make_inducings(5, &xt.view(), &mut rng);
        assert_eq!(z.dim(), (5, 1));
        let mut picked = z
            .column(0)
            .iter()
            .map(|v| {
                xt.column(0)
                    .iter()
                    .position(|x| x == v)
                    .expect("inducing point is a training row")
            })
            .collect::<Vec<_>>();
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 5);
        assert_eq!(make_inducings(50, &xt.view(), &mut rng).nrows(), 12);
    }

    #[test]
    fn test_svgp_determinism() {
        let (xt, yt) = sine_data(20);
        let fit = || {
            SparseVariationalGp::params(RbfKernel::new(1), Inducings::Randomized(5))
                .n_epochs(3)
                .batch_size(7)
                .seed(Some(7))
                .fit(&Dataset::new(xt.clone(), yt.clone()))
                .expect("svGP fit error")
        };
        let (a, b) = (fit(), fit());
        assert_eq!(a.variational_mean(), b.variational_mean());
        assert_eq!(a.inducings(), b.inducings());
        assert_eq!(a.losses(), b.losses());
    }
}
