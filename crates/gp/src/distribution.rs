use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Gaussian distribution over function values (or observations) at a set of inputs
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct MultivariateNormal<F: Float> {
    mean: Array1<F>,
    covariance: Array2<F>,
}

impl<F: Float> MultivariateNormal<F> {
    /// Distribution with given mean (n,) and covariance (n, n)
    pub fn new(mean: Array1<F>, covariance: Array2<F>) -> Result<Self> {
        if covariance.nrows() != mean.len() || covariance.ncols() != mean.len() {
            return Err(GpError::ConfigurationError(format!(
                "Covariance shape {:?} does not match mean length {}",
                covariance.shape(),
                mean.len()
            )));
        }
        Ok(MultivariateNormal { mean, covariance })
    }

    /// Mean vector
    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// Covariance matrix
    pub fn covariance(&self) -> &Array2<F> {
        &self.covariance
    }

    /// Marginal variances
    pub fn variance(&self) -> Array1<F> {
        self.covariance.diag().to_owned()
    }

    /// Marginal standard deviations, negative variances being clipped to zero
    pub fn stddev(&self) -> Array1<F> {
        self.covariance
            .diag()
            .mapv(|v| v.max(F::zero()).sqrt())
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    /// Whether the distribution is over zero points
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Add `value` to the diagonal of the covariance
    pub fn add_diagonal(mut self, value: F) -> Self {
        self.covariance.diag_mut().mapv_inplace(|v| v + value);
        self
    }

    /// Multiply the covariance by `factor`
    pub fn scale_covariance(mut self, factor: F) -> Self {
        self.covariance.mapv_inplace(|v| v * factor);
        self
    }

    /// Mean negative log density of `y` under the independent marginals
    pub fn marginal_nll(&self, y: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        if y.len() != self.len() {
            return Err(GpError::ConfigurationError(format!(
                "Expected {} targets, got {}",
                self.len(),
                y.len()
            )));
        }
        if self.is_empty() {
            return Err(GpError::ConfigurationError(
                "Cannot evaluate a distribution over zero points".to_string(),
            ));
        }
        let two_pi = F::cast(2. * std::f64::consts::PI);
        let half = F::cast(0.5);
        let total = Zip::from(&self.mean)
            .and(self.covariance.diag())
            .and(y)
            .fold(F::zero(), |acc, &mu, &var, &yi| {
                let r = yi - mu;
                acc + half * (two_pi * var).ln() + half * r * r / var
            });
        Ok(total / F::cast(self.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_shape_mismatch() {
        assert!(MultivariateNormal::new(array![0., 1.], Array2::eye(3)).is_err());
    }

    #[test]
    fn test_diagonal_operations() {
        let mvn = MultivariateNormal::new(array![1., 2.], array![[1., 0.5], [0.5, 2.]])
            .unwrap()
            .add_diagonal(1.)
            .scale_covariance(2.);
        assert_abs_diff_eq!(*mvn.covariance(), array![[4., 1.], [1., 6.]]);
        assert_abs_diff_eq!(mvn.stddev(), array![2., 6f64.sqrt()]);
    }

    #[test]
    fn test_marginal_nll() {
        let mvn = MultivariateNormal::new(array![0.], array![[1.]]).unwrap();
        let nll = mvn.marginal_nll(&array![1.]).unwrap();
        assert_abs_diff_eq!(nll, 0.5 * (2. * std::f64::consts::PI).ln() + 0.5, epsilon = 1e-12);
    }
}
