//! Synthetic 1-D regression curves
use crate::config::DataConfig;
use crate::data::{split_regression_data_intervals, ExperimentData};
use crate::errors::{ExperimentError, Result};
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use std::f64::consts::PI;
use std::fmt;

/// Noiseless curves from which toy regression data are sampled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    /// `sin(πx)`
    Sine,
    /// `exp(-x²) cos(6x)`
    DampedOscillation,
    /// `x² - 1`
    Parabola,
    /// `2 / (1 + exp(-5x)) - 1`
    Logistic,
    /// `|x| - 1`
    AbsoluteValue,
    /// `sin(2x) + sin(7x) / 2`
    TwoTones,
}

impl Curve {
    /// Every curve, in experiment order
    pub const ALL: [Curve; 6] = [
        Curve::Sine,
        Curve::DampedOscillation,
        Curve::Parabola,
        Curve::Logistic,
        Curve::AbsoluteValue,
        Curve::TwoTones,
    ];

    /// Seed used to draw the held-out test intervals of this curve
    pub fn seed(&self) -> u64 {
        match self {
            Curve::Sine => 1,
            Curve::DampedOscillation => 2,
            Curve::Parabola => 3,
            Curve::Logistic => 4,
            Curve::AbsoluteValue => 5,
            Curve::TwoTones => 6,
        }
    }

    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Curve::Sine => "sine",
            Curve::DampedOscillation => "dampedoscillation",
            Curve::Parabola => "parabola",
            Curve::Logistic => "logistic",
            Curve::AbsoluteValue => "absolutevalue",
            Curve::TwoTones => "twotones",
        }
    }

    /// Noiseless value at `x`
    pub fn value(&self, x: f64) -> f64 {
        match self {
            Curve::Sine => (PI * x).sin(),
            Curve::DampedOscillation => (-x * x).exp() * (6. * x).cos(),
            Curve::Parabola => x * x - 1.,
            Curve::Logistic => 2. / (1. + (-5. * x).exp()) - 1.,
            Curve::AbsoluteValue => x.abs() - 1.,
            Curve::TwoTones => (2. * x).sin() + 0.5 * (7. * x).sin(),
        }
    }

    /// Values at the first column of `x` plus gaussian noise of standard deviation `sigma_true`
    pub fn sample(
        &self,
        seed: u64,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        sigma_true: f64,
    ) -> Result<Array1<f64>> {
        if !(sigma_true >= 0.) {
            return Err(ExperimentError::InvalidValue(format!(
                "Noise standard deviation should be non negative, got {}",
                sigma_true
            )));
        }
        if x.ncols() != 1 {
            return Err(ExperimentError::InvalidValue(format!(
                "Curves are 1-D, got inputs of dimension {}",
                x.ncols()
            )));
        }
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let noise = Array1::<f64>::random_using(x.nrows(), StandardNormal, &mut rng);
        Ok(x.column(0).mapv(|v| self.value(v)) + noise * sigma_true)
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Regular grid of `n` points on `[-2, 2]` as a (n, 1) matrix
pub fn curve_inputs(n: usize) -> Array2<f64> {
    Array::linspace(-2., 2., n).insert_axis(Axis(1))
}

/// Noisy samples of `curve` split in train/validation and held-out test intervals
pub fn curve_experiment_data(curve: Curve, config: &DataConfig) -> Result<ExperimentData<f64>> {
    let x = curve_inputs(config.number_of_data_points);
    let y = curve.sample(config.seed, &x, config.sigma_true)?;
    split_regression_data_intervals(
        curve.name(),
        config.seed,
        curve.seed(),
        &x,
        &y,
        config.number_of_test_intervals,
        config.total_number_of_intervals,
        config.train_data_percentage,
    )
}
