//! Experiment configuration with the default values of the curves experiment
use crate::errors::{ExperimentError, Result};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Synthetic data generation and split
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct DataConfig {
    /// Seed of the target noise and of the train/validation shuffle
    pub seed: u64,
    /// Number of points on `[-2, 2]`
    pub number_of_data_points: usize,
    /// Standard deviation of the target noise
    pub sigma_true: f64,
    /// Number of intervals held out as test data
    pub number_of_test_intervals: usize,
    /// Number of intervals the input range is cut in
    pub total_number_of_intervals: usize,
    /// Fraction of the remaining points used for training, the others for validation
    pub train_data_percentage: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            seed: 0,
            number_of_data_points: 500,
            sigma_true: 0.3,
            number_of_test_intervals: 2,
            total_number_of_intervals: 8,
            train_data_percentage: 0.8,
        }
    }
}

/// Exact GPs fitted on training subsamples to learn the kernel
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct KernelConfig {
    /// Seed of the first subsample, the i-th one using `seed + i`
    pub seed: u64,
    /// Maximum number of points of a subsample
    pub subsample_size: usize,
    /// Number of subsample GPs
    pub number_of_iterations: usize,
    /// Adam epochs per GP
    pub number_of_epochs: usize,
    /// Adam learning rate
    pub learning_rate: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            seed: 0,
            subsample_size: 300,
            number_of_iterations: 3,
            number_of_epochs: 100,
            learning_rate: 0.05,
        }
    }
}

/// Number of induce points `⌊factor n^(1/power)⌋`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct InduceDataConfig {
    /// Seed of the selection tie order
    pub seed: u64,
    /// Multiplicative factor
    pub induce_data_factor: f64,
    /// Root applied to the number of training points
    pub induce_data_power: f64,
}

impl Default for InduceDataConfig {
    fn default() -> Self {
        InduceDataConfig {
            seed: 0,
            induce_data_factor: 2.0,
            induce_data_power: 2.0,
        }
    }
}

/// Gradient flow training and observation noise search
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct PwgfConfig {
    /// Seed of the particle initialization
    pub seed: u64,
    /// Number of particles
    pub number_of_particles: usize,
    /// Number of line-searched epochs
    pub number_of_epochs: usize,
    /// Smallest learning rate tried
    pub learning_rate_lower: f64,
    /// Largest learning rate tried
    pub learning_rate_upper: f64,
    /// Number of learning rates tried per epoch
    pub number_of_learning_rate_searches: usize,
    /// Maximum L2 norm of a particle
    pub max_particle_magnitude: f64,
    /// Jitter of the induce gram matrix
    pub jitter: f64,
    /// Smallest observation noise searched
    pub observation_noise_lower: f64,
    /// Largest observation noise searched
    pub observation_noise_upper: f64,
    /// Size of the observation noise grid
    pub number_of_observation_noise_searches: usize,
}

impl Default for PwgfConfig {
    fn default() -> Self {
        PwgfConfig {
            seed: 0,
            number_of_particles: 100,
            number_of_epochs: 100,
            learning_rate_lower: 1e-5,
            learning_rate_upper: 1e-1,
            number_of_learning_rate_searches: 10,
            max_particle_magnitude: 1e8,
            jitter: 1e-6,
            observation_noise_lower: 1e-4,
            observation_noise_upper: 1.0,
            number_of_observation_noise_searches: 20,
        }
    }
}

/// svGP baselines training
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SvgpConfig {
    /// Seed of the mini-batch shuffles
    pub seed: u64,
    /// Number of epochs
    pub number_of_epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Smallest learning rate tried
    pub learning_rate_lower: f64,
    /// Largest learning rate tried
    pub learning_rate_upper: f64,
    /// Number of learning rates tried
    pub number_of_learning_rate_searches: usize,
}

impl Default for SvgpConfig {
    fn default() -> Self {
        SvgpConfig {
            seed: 0,
            number_of_epochs: 50,
            batch_size: 128,
            learning_rate_lower: 1e-3,
            learning_rate_upper: 1e-1,
            number_of_learning_rate_searches: 3,
        }
    }
}

/// Whole configuration of one experiment
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ExperimentConfig {
    /// Data
    pub data: DataConfig,
    /// Kernel learning
    pub kernel: KernelConfig,
    /// Induce points
    pub induce_data: InduceDataConfig,
    /// Gradient flow
    pub pwgf: PwgfConfig,
    /// svGP baselines
    pub svgp: SvgpConfig,
}

impl ExperimentConfig {
    /// Check values the model builders do not check themselves
    pub fn check(&self) -> Result<()> {
        let data = &self.data;
        if data.number_of_data_points < 2 {
            return Err(ExperimentError::InvalidValue(format!(
                "At least two data points are needed, got {}",
                data.number_of_data_points
            )));
        }
        if !(data.train_data_percentage > 0. && data.train_data_percentage < 1.) {
            return Err(ExperimentError::InvalidValue(format!(
                "Train data percentage should be in ]0, 1[ to keep validation data, got {}",
                data.train_data_percentage
            )));
        }
        if self.kernel.number_of_iterations == 0 || self.kernel.subsample_size == 0 {
            return Err(ExperimentError::InvalidValue(
                "At least one non empty subsample GP is needed".to_string(),
            ));
        }
        let induce = &self.induce_data;
        if !(induce.induce_data_factor > 0.) || !(induce.induce_data_power > 0.) {
            return Err(ExperimentError::InvalidValue(format!(
                "Induce data factor and power should be positive, got {} and {}",
                induce.induce_data_factor, induce.induce_data_power
            )));
        }
        let pwgf = &self.pwgf;
        if !(pwgf.observation_noise_lower > 0.)
            || pwgf.observation_noise_lower > pwgf.observation_noise_upper
        {
            return Err(ExperimentError::InvalidValue(format!(
                "Observation noise search expects 0 < lower <= upper, got [{}, {}]",
                pwgf.observation_noise_lower, pwgf.observation_noise_upper
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ExperimentConfig::default().check().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ExperimentConfig::default();
        config.data.train_data_percentage = 1.0;
        assert!(config.check().is_err());

        let mut config = ExperimentConfig::default();
        config.pwgf.observation_noise_lower = 2.0;
        assert!(config.check().is_err());

        let mut config = ExperimentConfig::default();
        config.kernel.number_of_iterations = 0;
        assert!(config.check().is_err());
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_config_json_roundtrip() {
        let config = ExperimentConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ExperimentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
