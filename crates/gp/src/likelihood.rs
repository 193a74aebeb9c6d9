use crate::errors::{GpError, Result};
use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Homoscedastic gaussian observation model `y = f(x) + eps`, `eps ~ N(0, noise)`
///
/// When optimized, the noise variance is parameterized by `raw = ln(noise - NOISE_FLOOR)`
/// which keeps it above [`GaussianLikelihood::NOISE_FLOOR`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct GaussianLikelihood<F: Float> {
    noise: F,
}

impl<F: Float> Default for GaussianLikelihood<F> {
    /// Noise variance `softplus(0) + NOISE_FLOOR`
    fn default() -> Self {
        GaussianLikelihood {
            noise: F::cast(std::f64::consts::LN_2 + Self::NOISE_FLOOR),
        }
    }
}

impl<F: Float> GaussianLikelihood<F> {
    /// Lower bound of the noise variance
    pub const NOISE_FLOOR: f64 = 1e-4;

    /// Likelihood with the given noise variance
    pub fn new(noise: F) -> Result<Self> {
        if !noise.is_finite() || noise <= F::zero() {
            return Err(GpError::ConfigurationError(format!(
                "Noise variance should be finite and positive, got {}",
                noise
            )));
        }
        Ok(GaussianLikelihood { noise })
    }

    /// Noise variance
    pub fn noise(&self) -> F {
        self.noise
    }

    /// Unconstrained noise parameter `ln(noise - NOISE_FLOOR)`
    ///
    /// A noise at or below the floor maps to the smallest representable parameter.
    pub fn raw_noise(&self) -> F {
        (self.noise - F::cast(Self::NOISE_FLOOR))
            .max(F::min_positive_value())
            .ln()
    }

    /// Likelihood from an unconstrained noise parameter
    pub fn from_raw_noise(raw: F) -> Self {
        GaussianLikelihood {
            noise: F::cast(Self::NOISE_FLOOR) + raw.exp(),
        }
    }

    /// Likelihood whose noise is the mean of the given ones
    pub fn average(likelihoods: &[Self]) -> Result<Self> {
        if likelihoods.is_empty() {
            return Err(GpError::ConfigurationError(
                "Cannot average an empty set of likelihoods".to_string(),
            ));
        }
        let noise = likelihoods
            .iter()
            .fold(F::zero(), |acc, l| acc + l.noise)
            / F::cast(likelihoods.len());
        Self::new(noise)
    }
}

impl<F: Float> fmt::Display for GaussianLikelihood<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GaussianLikelihood(noise={})", self.noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_noise() {
        let lik = GaussianLikelihood::<f64>::default();
        assert_abs_diff_eq!(lik.noise(), 0.6932471805599453, epsilon = 1e-12);
        let back = GaussianLikelihood::from_raw_noise(lik.raw_noise());
        assert_abs_diff_eq!(back.noise(), lik.noise(), epsilon = 1e-12);
    }

    #[test]
    fn test_average() {
        let l1 = GaussianLikelihood::new(0.1).unwrap();
        let l2 = GaussianLikelihood::new(0.3).unwrap();
        let avg = GaussianLikelihood::average(&[l1, l2]).unwrap();
        assert_abs_diff_eq!(avg.noise(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_noise() {
        assert!(GaussianLikelihood::new(0.0).is_err());
        assert!(GaussianLikelihood::new(f64::NAN).is_err());
    }
}
