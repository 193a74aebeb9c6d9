//! Stages of an experiment, from kernel learning to predictive metrics
use crate::config::{ExperimentConfig, KernelConfig, PwgfConfig, SvgpConfig};
use crate::curves::{curve_experiment_data, Curve};
use crate::data::{Data, ExperimentData};
use crate::errors::{ExperimentError, Result};
use linfa::prelude::{Dataset, Fit};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use pwgf_flow::{
    ConditionalVarianceInduceDataSelector, GradientFlowKernel, InduceData, InduceDataSelector,
    ProjectedWassersteinGradientFlow, TemperGp,
};
use pwgf_gp::metrics::{PredictiveMetrics, PredictiveScore};
use pwgf_gp::{
    ExactGp, GaussianLikelihood, GpModel, Inducings, ParamTuning, RbfKernel, SparseVariationalGp,
};
use rand_xoshiro::Xoshiro256Plus;

use log::info;
use std::fmt;
use std::time::Instant;

/// Gradient flow over an RBF kernel
pub type Pwgf = ProjectedWassersteinGradientFlow<f64, RbfKernel<f64>>;
/// svGP over an RBF kernel
pub type Svgp = SparseVariationalGp<f64, RbfKernel<f64>>;
/// Exact GP over an RBF kernel
pub type Gp = ExactGp<f64, RbfKernel<f64>>;

/// Metrics of one model on one split
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsRow {
    /// Experiment name
    pub dataset: String,
    /// Model name
    pub model: String,
    /// Split name
    pub split: String,
    /// Metrics in original target units
    pub metrics: PredictiveMetrics<f64>,
}

impl fmt::Display for MetricsRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<18} {:<14} {:<10} mae={:.4} mse={:.4} nll={:.4} width={:.4}",
            self.dataset,
            self.model,
            self.split,
            self.metrics.mae,
            self.metrics.mse,
            self.metrics.nll,
            self.metrics.average_interval_width
        )
    }
}

/// `⌊factor n^(1/power)⌋` clamped to `[1, n]`
pub fn number_of_induce_points(n: usize, factor: f64, power: f64) -> usize {
    let m = (factor * (n as f64).powf(1. / power)).floor();
    if m.is_finite() && m >= 1. {
        (m as usize).min(n.max(1))
    } else {
        1
    }
}

/// Exact GPs trained on random subsamples of the training split
///
/// The i-th GP is trained on at most `subsample_size` points drawn with seed `seed + i`.
pub fn learn_subsample_gps(
    experiment_data: &ExperimentData<f64>,
    kernel: &RbfKernel<f64>,
    config: &KernelConfig,
) -> Result<Vec<Gp>> {
    let train = &experiment_data.train;
    let n = train.len();
    (0..config.number_of_iterations)
        .map(|i| {
            let mut indices = (0..n).collect::<Vec<_>>();
            let seed = config.seed + i as u64;
            indices.shuffle(&mut Xoshiro256Plus::seed_from_u64(seed));
            indices.truncate(config.subsample_size.min(n));
            let subsample = train.select(&indices, format!("subsample-{}", i));
            let gp = ExactGp::params(kernel.clone())
                .n_epochs(config.number_of_epochs)
                .learning_rate(config.learning_rate)
                .fit(&Dataset::new(
                    subsample.x().to_owned(),
                    subsample.targets()?.to_owned(),
                ))?;
            info!("Subsample GP {} on {} points: {}", i, indices.len(), gp);
            Ok(gp)
        })
        .collect()
}

/// Kernel and likelihood whose parameters are the means of the given GPs ones
pub fn average_kernel_and_likelihood(
    gps: &[Gp],
) -> Result<(RbfKernel<f64>, GaussianLikelihood<f64>)> {
    let kernels = gps.iter().map(|gp| gp.kernel().clone()).collect::<Vec<_>>();
    let likelihoods = gps.iter().map(|gp| *gp.likelihood()).collect::<Vec<_>>();
    Ok((
        RbfKernel::average(&kernels)?,
        GaussianLikelihood::average(&likelihoods)?,
    ))
}

/// Induce points of `data` selected by maximal conditional variance under `kernel`
pub fn select_induce_data(
    data: &Data<f64>,
    kernel: &RbfKernel<f64>,
    number_of_induce_points: usize,
    seed: u64,
) -> Result<InduceData<f64>> {
    let induce = ConditionalVarianceInduceDataSelector.select(
        kernel,
        data.x(),
        data.y(),
        number_of_induce_points,
        seed,
    )?;
    info!(
        "Selected {} induce points out of {} '{}' points",
        induce.len(),
        data.len(),
        data.name()
    );
    Ok(induce)
}

/// Gradient flow with particles at the induce points, its kernel approximated on the training
/// inputs and its learning rates chosen on the validation split
pub fn train_projected_wasserstein_gradient_flow(
    kernel: RbfKernel<f64>,
    experiment_data: &ExperimentData<f64>,
    induce_data: &InduceData<f64>,
    config: &PwgfConfig,
    observation_noise: f64,
) -> Result<Pwgf> {
    let train = &experiment_data.train;
    let validation = &experiment_data.validation;
    let flow_kernel = GradientFlowKernel::new(kernel, train.x().to_owned())?;
    let mut params = ProjectedWassersteinGradientFlow::params(flow_kernel, induce_data.x.clone())
        .number_of_particles(config.number_of_particles)
        .number_of_epochs(config.number_of_epochs)
        .learning_rate_search(
            config.learning_rate_lower,
            config.learning_rate_upper,
            config.number_of_learning_rate_searches,
        )
        .max_particle_magnitude(config.max_particle_magnitude)
        .jitter(config.jitter)
        .observation_noise(observation_noise)
        .seed(config.seed);
    if !validation.is_empty() {
        params = params.validation_data(validation.x().to_owned(), validation.targets()?.to_owned());
    }
    let now = Instant::now();
    let flow = params.fit(&Dataset::new(
        train.x().to_owned(),
        train.targets()?.to_owned(),
    ))?;
    info!("PWGF trained in {:?}", now.elapsed());
    Ok(flow)
}

/// Observation noise of `flow` fitted on `data`, stored in the flow and returned
///
/// The noise is searched in normalised target units and logged in original units.
pub fn pwgf_observation_noise_search(
    data: &Data<f64>,
    flow: &mut Pwgf,
    config: &PwgfConfig,
    y_std: f64,
) -> Result<f64> {
    let noise = flow.observation_noise_search(
        data.x(),
        data.targets()?,
        config.observation_noise_lower,
        config.observation_noise_upper,
        config.number_of_observation_noise_searches,
    )?;
    info!(
        "PWGF observation noise={} ({} in original units)",
        noise,
        noise * y_std * y_std
    );
    Ok(noise)
}

/// svGP on the induce points
///
/// A fixed svGP keeps the given kernel, the inducing locations and `observation_noise` when
/// given, learning the variational distribution and the kernel only.
pub fn train_svgp(
    experiment_data: &ExperimentData<f64>,
    induce_data: &InduceData<f64>,
    kernel: RbfKernel<f64>,
    config: &SvgpConfig,
    is_fixed: bool,
    observation_noise: Option<f64>,
) -> Result<Svgp> {
    let train = &experiment_data.train;
    let noise = match observation_noise {
        Some(noise) if is_fixed => ParamTuning::Fixed(noise),
        Some(noise) => ParamTuning::Optimized(noise),
        None => ParamTuning::default(),
    };
    let now = Instant::now();
    let svgp = SparseVariationalGp::params(kernel, Inducings::Located(induce_data.x.clone()))
        .is_fixed(is_fixed)
        .noise_variance(noise)
        .n_epochs(config.number_of_epochs)
        .batch_size(config.batch_size)
        .learning_rate_search(
            config.learning_rate_lower,
            config.learning_rate_upper,
            config.number_of_learning_rate_searches,
        )
        .seed(Some(config.seed))
        .fit(&Dataset::new(
            train.x().to_owned(),
            train.targets()?.to_owned(),
        ))?;
    info!(
        "{} svGP trained in {:?}: {}",
        if is_fixed { "Fixed" } else { "Learned" },
        now.elapsed(),
        svgp
    );
    Ok(svgp)
}

/// Metrics of `model` on every non empty split
pub fn evaluate<M: GpModel<f64>>(
    model_name: &str,
    model: &M,
    experiment_data: &ExperimentData<f64>,
) -> Result<Vec<MetricsRow>> {
    [
        &experiment_data.train,
        &experiment_data.validation,
        &experiment_data.test,
    ]
    .into_iter()
    .filter(|data| !data.is_empty())
    .map(|data| {
        let metrics = model.predictive_metrics(data.x(), data.targets()?, experiment_data.y_std)?;
        info!("{} on {} {}: {}", model_name, experiment_data.name, data.name(), metrics);
        Ok(MetricsRow {
            dataset: experiment_data.name.clone(),
            model: model_name.to_string(),
            split: data.name().to_string(),
            metrics,
        })
    })
    .collect()
}

/// `model` tempered on the validation split
pub fn temper<M: GpModel<f64>>(
    model: M,
    experiment_data: &ExperimentData<f64>,
) -> Result<TemperGp<f64, M>> {
    let validation = &experiment_data.validation;
    if validation.is_empty() {
        return Err(ExperimentError::InvalidValue(
            "Tempering needs validation data".to_string(),
        ));
    }
    let tempered = TemperGp::new(model, validation.x(), validation.targets()?)?;
    info!("Temperature={}", tempered.temperature());
    Ok(tempered)
}

/// Every model of the benchmark trained and evaluated on `experiment_data`
///
/// Models are reported as `exact-gp` (exact GP with the subsample averaged kernel),
/// `pwgf`, `tempered-pwgf`, `fixed-svgp` (kernel, inducing locations and noise of the flow),
/// `svgp` (everything learned), `pwgf-svgp` (a flow over the kernel, noise and learned
/// inducing locations of the svGP) and `tempered-svgp`.
pub fn run_experiment(
    experiment_data: &ExperimentData<f64>,
    config: &ExperimentConfig,
) -> Result<Vec<MetricsRow>> {
    config.check()?;
    let train = &experiment_data.train;
    let dim = experiment_data.dim();
    let mut rows = Vec::new();

    let gps = learn_subsample_gps(experiment_data, &RbfKernel::new(dim), &config.kernel)?;
    let (kernel, likelihood) = average_kernel_and_likelihood(&gps)?;
    info!("Average kernel {} and {}", kernel, likelihood);

    let exact_gp = ExactGp::params(kernel.clone())
        .likelihood(likelihood)
        .n_epochs(0)
        .fit(&Dataset::new(
            train.x().to_owned(),
            train.targets()?.to_owned(),
        ))?;
    rows.extend(evaluate("exact-gp", &exact_gp, experiment_data)?);

    let m = number_of_induce_points(
        train.len(),
        config.induce_data.induce_data_factor,
        config.induce_data.induce_data_power,
    );
    let induce_data = select_induce_data(train, &kernel, m, config.induce_data.seed)?;

    let mut pwgf = train_projected_wasserstein_gradient_flow(
        kernel.clone(),
        experiment_data,
        &induce_data,
        &config.pwgf,
        likelihood.noise(),
    )?;
    let noise =
        pwgf_observation_noise_search(train, &mut pwgf, &config.pwgf, experiment_data.y_std)?;
    rows.extend(evaluate("pwgf", &pwgf, experiment_data)?);
    rows.extend(evaluate(
        "tempered-pwgf",
        &temper(pwgf, experiment_data)?,
        experiment_data,
    )?);

    let fixed_svgp = train_svgp(
        experiment_data,
        &induce_data,
        kernel,
        &config.svgp,
        true,
        Some(noise),
    )?;
    rows.extend(evaluate("fixed-svgp", &fixed_svgp, experiment_data)?);

    let svgp = train_svgp(
        experiment_data,
        &induce_data,
        RbfKernel::new(dim),
        &config.svgp,
        false,
        None,
    )?;
    rows.extend(evaluate("svgp", &svgp, experiment_data)?);

    let svgp_induce_data = InduceData {
        x: svgp.inducings().clone(),
        y: None,
        indices: vec![],
    };
    let pwgf_svgp = train_projected_wasserstein_gradient_flow(
        svgp.kernel().clone(),
        experiment_data,
        &svgp_induce_data,
        &config.pwgf,
        svgp.observation_noise(),
    )?;
    rows.extend(evaluate("pwgf-svgp", &pwgf_svgp, experiment_data)?);
    rows.extend(evaluate(
        "tempered-svgp",
        &temper(svgp, experiment_data)?,
        experiment_data,
    )?);
    Ok(rows)
}

/// Curve experiment: synthetic data of `curve`, then [`run_experiment`]
pub fn run_curves_experiment(curve: Curve, config: &ExperimentConfig) -> Result<Vec<MetricsRow>> {
    config.check()?;
    let experiment_data = curve_experiment_data(curve, &config.data)?;
    info!(
        "Curve {}: {} train, {} validation, {} test points",
        curve,
        experiment_data.train.len(),
        experiment_data.validation.len(),
        experiment_data.test.len()
    );
    run_experiment(&experiment_data, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use std::collections::HashSet;

    fn small_config() -> ExperimentConfig {
        let mut config = ExperimentConfig {
            data: DataConfig {
                number_of_data_points: 60,
                ..DataConfig::default()
            },
            ..ExperimentConfig::default()
        };
        config.kernel.number_of_iterations = 2;
        config.kernel.number_of_epochs = 10;
        config.pwgf.number_of_particles = 20;
        config.pwgf.number_of_epochs = 3;
        config.pwgf.number_of_learning_rate_searches = 3;
        config.svgp.number_of_epochs = 2;
        config.svgp.batch_size = 16;
        config.svgp.number_of_learning_rate_searches = 2;
        config
    }

    #[test]
    fn test_number_of_induce_points() {
        assert_eq!(number_of_induce_points(100, 2., 2.), 20);
        assert_eq!(number_of_induce_points(100, 1., 3.), 4);
        assert_eq!(number_of_induce_points(10, 5., 1.), 10);
        assert_eq!(number_of_induce_points(10, 0.01, 2.), 1);
    }

    #[test]
    fn test_subsample_gps() {
        let config = small_config();
        let exp = curve_experiment_data(Curve::Sine, &config.data).unwrap();
        let kernel_config = KernelConfig {
            subsample_size: 10,
            ..config.kernel.clone()
        };
        let gps = learn_subsample_gps(&exp, &RbfKernel::new(1), &kernel_config).unwrap();
        assert_eq!(gps.len(), 2);
        assert!(gps.iter().all(|gp| gp.training_inputs().nrows() == 10));
        assert_ne!(gps[0].training_inputs(), gps[1].training_inputs());
        let (kernel, likelihood) = average_kernel_and_likelihood(&gps).unwrap();
        assert!(kernel.outputscale() > 0.);
        assert!(likelihood.noise() > 0.);
    }

    #[test]
    fn test_run_curves_experiment() {
        let rows = run_curves_experiment(Curve::Parabola, &small_config()).unwrap();
        let models = rows.iter().map(|r| r.model.as_str()).collect::<HashSet<_>>();
        assert_eq!(
            models,
            [
                "exact-gp",
                "pwgf",
                "tempered-pwgf",
                "fixed-svgp",
                "svgp",
                "pwgf-svgp",
                "tempered-svgp"
            ]
            .into_iter()
            .collect()
        );
        assert_eq!(rows.len(), 21);
        for row in rows.iter() {
            assert_eq!(row.dataset, "parabola");
            assert!(row.metrics.mae.is_finite(), "{}", row);
            assert!(row.metrics.nll.is_finite(), "{}", row);
            assert!(row.metrics.average_interval_width > 0., "{}", row);
        }
    }

    #[test]
    fn test_temper_needs_validation() {
        let config = small_config();
        let mut exp = curve_experiment_data(Curve::Sine, &config.data).unwrap();
        exp.validation = exp.validation.select(&[], "validation");
        let gp = ExactGp::params(RbfKernel::new(1))
            .n_epochs(0)
            .fit(&Dataset::new(
                exp.train.x().to_owned(),
                exp.train.targets().unwrap().to_owned(),
            ))
            .unwrap();
        assert!(matches!(
            temper(gp, &exp),
            Err(ExperimentError::InvalidValue(_))
        ));
    }
}
