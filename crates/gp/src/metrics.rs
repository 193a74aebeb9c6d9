//! A module for metrics to evaluate predictive distributions of Gaussian Process models.
//!
//! Models are trained on standardized targets, metrics are reported in original target
//! units given the target standard deviation `y_std` used for standardization.

use crate::distribution::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::model::GpModel;
use linfa::Float;
use ndarray::{ArrayBase, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Two-sided 95% quantile of the standard normal distribution
pub const Z_95: f64 = 1.96;

fn check_len<F: Float>(dist: &MultivariateNormal<F>, n: usize) -> Result<()> {
    if dist.len() != n || n == 0 {
        return Err(GpError::ConfigurationError(format!(
            "Expected {} non empty targets, got {}",
            dist.len(),
            n
        )));
    }
    Ok(())
}

/// Mean absolute error of the predictive mean
pub fn mae<F: Float>(
    dist: &MultivariateNormal<F>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y_std: F,
) -> Result<F> {
    check_len(dist, y.len())?;
    let sum = Zip::from(dist.mean())
        .and(y)
        .fold(F::zero(), |acc, &m, &t| acc + num_traits::Float::abs(m - t));
    Ok(sum / F::cast(y.len()) * y_std)
}

/// Mean squared error of the predictive mean
pub fn mse<F: Float>(
    dist: &MultivariateNormal<F>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y_std: F,
) -> Result<F> {
    check_len(dist, y.len())?;
    let sum = Zip::from(dist.mean())
        .and(y)
        .fold(F::zero(), |acc, &m, &t| acc + (m - t) * (m - t));
    Ok(sum / F::cast(y.len()) * y_std * y_std)
}

/// Mean negative log density of the targets under the marginals.
///
/// Rescaling targets by `y_std` shifts each log density by `ln(y_std)`.
pub fn nll<F: Float>(
    dist: &MultivariateNormal<F>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y_std: F,
) -> Result<F> {
    check_len(dist, y.len())?;
    Ok(dist.marginal_nll(y)? + y_std.ln())
}

/// Mean width of the 95% marginal prediction intervals
pub fn average_interval_width<F: Float>(dist: &MultivariateNormal<F>, y_std: F) -> Result<F> {
    let width = dist.stddev().mapv(|s| F::cast(2. * Z_95) * s * y_std);
    width.mean().ok_or_else(|| {
        GpError::ConfigurationError("Cannot compute interval width of an empty distribution".to_string())
    })
}

/// Predictive metrics in original target units
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct PredictiveMetrics<F: Float> {
    /// Mean absolute error
    pub mae: F,
    /// Mean squared error
    pub mse: F,
    /// Mean negative log likelihood
    pub nll: F,
    /// Average width of 95% prediction intervals
    pub average_interval_width: F,
}

impl<F: Float> PredictiveMetrics<F> {
    /// Compute all metrics of a predictive distribution
    pub fn compute(
        dist: &MultivariateNormal<F>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        y_std: F,
    ) -> Result<Self> {
        Ok(PredictiveMetrics {
            mae: mae(dist, y, y_std)?,
            mse: mse(dist, y, y_std)?,
            nll: nll(dist, y, y_std)?,
            average_interval_width: average_interval_width(dist, y_std)?,
        })
    }
}

impl<F: Float> fmt::Display for PredictiveMetrics<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mae={}, mse={}, nll={}, average_interval_width={}",
            self.mae, self.mse, self.nll, self.average_interval_width
        )
    }
}

/// A trait scoring the predictive distribution of a model on test data
pub trait PredictiveScore<F: Float>: GpModel<F> {
    /// Metrics of the predictive distribution (observation noise included) at `x` against `y`
    fn predictive_metrics(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        y_std: F,
    ) -> Result<PredictiveMetrics<F>> {
        let dist = self.predict(x)?;
        PredictiveMetrics::compute(&dist, y, y_std)
    }
}

impl<F: Float, M: GpModel<F>> PredictiveScore<F> for M {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExactGp, LinearKernel};
    use approx::assert_abs_diff_eq;
    use linfa::prelude::{Dataset, Fit};
    use ndarray::{array, Array2};

    fn diagonal(mean: ndarray::Array1<f64>, var: f64) -> MultivariateNormal<f64> {
        let n = mean.len();
        MultivariateNormal::new(mean, Array2::eye(n) * var).unwrap()
    }

    #[test]
    fn test_point_metrics() {
        let dist = diagonal(array![1., 2., 3.], 0.25);
        let y = array![1.5, 2., 2.];
        assert_abs_diff_eq!(mae(&dist, &y, 1.).unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(mse(&dist, &y, 1.).unwrap(), 1.25 / 3., epsilon = 1e-12);
        assert_abs_diff_eq!(mae(&dist, &y, 2.).unwrap(), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(mse(&dist, &y, 2.).unwrap(), 5. / 3., epsilon = 1e-12);
    }

    #[test]
    fn test_interval_width() {
        let dist = diagonal(array![0., 0.], 4.);
        assert_abs_diff_eq!(average_interval_width(&dist, 1.).unwrap(), 7.84, epsilon = 1e-12);
        assert_abs_diff_eq!(average_interval_width(&dist, 0.5).unwrap(), 3.92, epsilon = 1e-12);
    }

    #[test]
    fn test_nll_rescaling() {
        let dist = diagonal(array![0.], 1., epsilon = 1e-12);
        let y = array![0.];
        let expected = 0.5 * (2. * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(nll(&dist, &y, 1.).unwrap(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(
            nll(&dist, &y, 3.).unwrap(),
            expected + 3f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_mismatched_targets() {
        let dist = diagonal(array![0., 1.], 1., epsilon = 1e-12);
        assert!(mae(&dist, &array![0.], 1.).is_err());
    }

    #[test]
    fn test_model_score() {
        let xt = array![[0.], [1.], [2.], [3.]];
        let yt = array![0., 2., 4., 6.];
        let gp = ExactGp::params(LinearKernel::new(4.).unwrap())
            .n_epochs(0)
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .unwrap();
        let metrics = gp.predictive_metrics(&xt, &yt, 1.).unwrap();
        assert!(metrics.mae < 0.2);
        assert!(metrics.average_interval_width > 0.);
    }
}
