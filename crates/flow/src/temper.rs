use crate::errors::{FlowError, Result};
use linfa::Float;
use ndarray::{ArrayBase, Data, Ix1, Ix2, Zip};
use pwgf_gp::{GpModel, MultivariateNormal};
use std::marker::PhantomData;

/// Default lower bound of the temperature
pub const DEFAULT_MIN_TEMPERATURE: f64 = 1e-6;

/// Post-hoc variance calibration of a GP model by temperature scaling
///
/// The temperature is computed once from a calibration set as the mean squared standardized
/// residual of the base predictive distribution (observation noise included)
///
/// `τ = Σ_i (y_i - μ_i)² / v_i / max(n - 1, 1)`
///
/// clamped below by a minimum temperature. Predictions keep the base mean and multiply the
/// predictive covariance by `τ`.
#[derive(Clone, Debug)]
pub struct TemperGp<F: Float, M: GpModel<F>> {
    gp: M,
    temperature: F,
    phantom: PhantomData<F>,
}

impl<F: Float, M: GpModel<F>> TemperGp<F, M> {
    /// Calibrate `gp` on `(x_calibration, y_calibration)`
    pub fn new(
        gp: M,
        x_calibration: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y_calibration: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self> {
        Self::with_min_temperature(
            gp,
            x_calibration,
            y_calibration,
            F::cast(DEFAULT_MIN_TEMPERATURE),
        )
    }

    /// Calibrate `gp` with a given lower bound of the temperature
    pub fn with_min_temperature(
        gp: M,
        x_calibration: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y_calibration: &ArrayBase<impl Data<Elem = F>, Ix1>,
        min_temperature: F,
    ) -> Result<Self> {
        if !(min_temperature > F::zero()) {
            return Err(FlowError::configuration(format!(
                "Minimum temperature should be positive, got {}",
                min_temperature
            )));
        }
        let n = y_calibration.len();
        if n == 0 || x_calibration.nrows() != n {
            return Err(FlowError::configuration(format!(
                "Expected non empty calibration data with as many targets as inputs, got {} inputs and {} targets",
                x_calibration.nrows(),
                n
            )));
        }
        let dist = gp.predict(x_calibration)?;
        let variance = dist.variance();
        if variance.iter().any(|&v| !(v > F::zero())) {
            return Err(FlowError::numerical(
                "Calibration predictive variances should be positive",
            ));
        }
        let total = Zip::from(dist.mean())
            .and(&variance)
            .and(y_calibration)
            .fold(F::zero(), |acc, &mu, &v, &y| acc + (y - mu) * (y - mu) / v);
        let temperature = (total / F::cast(n.saturating_sub(1).max(1))).max(min_temperature);
        if !temperature.is_finite() {
            return Err(FlowError::numerical("Temperature is not finite"));
        }
        log::info!("TemperGP temperature={} from {} calibration points", temperature, n);
        Ok(TemperGp {
            gp,
            temperature,
            phantom: PhantomData,
        })
    }

    /// Temperature `τ`
    pub fn temperature(&self) -> F {
        self.temperature
    }

    /// Calibrated model
    pub fn base(&self) -> &M {
        &self.gp
    }

    /// Calibrated model, consuming the wrapper
    pub fn into_base(self) -> M {
        self.gp
    }
}

impl<F: Float, M: GpModel<F>> GpModel<F> for TemperGp<F, M> {
    type Kern = M::Kern;

    fn kernel(&self) -> &Self::Kern {
        self.gp.kernel()
    }

    fn observation_noise(&self) -> F {
        self.gp.observation_noise() * self.temperature
    }

    fn predict_latent(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> pwgf_gp::Result<MultivariateNormal<F>> {
        Ok(self.gp.predict_latent(x)?.scale_covariance(self.temperature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use linfa::prelude::{Dataset, Fit};
    use ndarray::{array, Array2};
    use pwgf_gp::{ExactGp, GaussianLikelihood, LinearKernel, SparseVariationalGp};

    fn x_train() -> Array2<f64> {
        array![
            [1.1, 3.5, 3.5],
            [1.3, 7.5, 1.5],
            [2.5, 2.5, 0.5],
            [1.0, 2.0, 3.0],
            [1.5, 2.5, 3.5]
        ]
    }

    fn calibration() -> (Array2<f64>, ndarray::Array1<f64>) {
        (array![[1.0, 2.0, 3.0], [1.5, 2.5, 3.5]], array![2.1, 3.3])
    }

    fn x_test() -> Array2<f64> {
        array![[3.2, 4.2, 4.0], [5.1, 2.1, 9.5]]
    }

    #[test]
    fn test_temper_exact_gp_mean() {
        let gp = ExactGp::params(LinearKernel::default())
            .n_epochs(0)
            .fit(&Dataset::new(x_train(), array![0.1, 2.3, 3.1, 2.1, 3.3]))
            .expect("GP fitted");
        let (x_cal, y_cal) = calibration();
        let temper = TemperGp::new(gp.clone(), &x_cal, &y_cal).unwrap();
        let dist = temper.predict(&x_test()).unwrap();
        assert_abs_diff_eq!(
            *dist.mean(),
            array![4.2897491455078125, 6.886444091796875],
            epsilon = 1e-4
        );
        let base = gp.predict(&x_test()).unwrap();
        assert_abs_diff_eq!(
            *dist.covariance(),
            base.covariance() * temper.temperature(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_temper_svgp_covariance() {
        let svgp = SparseVariationalGp::new(
            LinearKernel::default(),
            GaussianLikelihood::default(),
            x_train(),
            1e-4,
        )
        .unwrap();
        let (x_cal, y_cal) = calibration();
        let temper = TemperGp::new(svgp, &x_cal, &y_cal).unwrap();
        assert_abs_diff_eq!(temper.temperature(), 0.8079856530271845, epsilon = 1e-9);

        let cov = temper.predict(&x_test()).unwrap().covariance().to_owned();
        let expected = array![
            [36.01462502929214, 51.01621413213643],
            [51.01621413213643, 98.05984332524964]
        ];
        assert_abs_diff_eq!(cov, expected, epsilon = 1e-8);
        // reference values come from an untrained svGP whose variational mean was drawn with
        // a random `mean_init_std` perturbation, which moves the calibration residuals and
        // the temperature (about 0.8046 against 0.8080 here), hence the 1e-2 tolerance
        let reference = array![
            [35.86377716064453, 50.80253219604492],
            [50.80253219604492, 97.64912414550781]
        ];
        assert_relative_eq!(cov, reference, max_relative = 1e-2);
    }

    #[test]
    fn test_zero_residuals_give_min_temperature() {
        let gp = ExactGp::params(LinearKernel::default())
            .n_epochs(0)
            .fit(&Dataset::new(x_train(), array![0.1, 2.3, 3.1, 2.1, 3.3]))
            .expect("GP fitted");
        let (x_cal, _) = calibration();
        let y_perfect = gp.predict(&x_cal).unwrap().mean().to_owned();
        let temper = TemperGp::new(gp, &x_cal, &y_perfect).unwrap();
        assert_abs_diff_eq!(temper.temperature(), DEFAULT_MIN_TEMPERATURE);
        let var = temper.predict(&x_cal).unwrap().variance();
        assert!(var.iter().all(|&v| v > 0. && v < 1e-4));
    }

    #[test]
    fn test_deterministic_temperature() {
        let (x_cal, y_cal) = calibration();
        let svgp = || {
            SparseVariationalGp::new(
                LinearKernel::default(),
                GaussianLikelihood::default(),
                x_train(),
                1e-4,
            )
            .unwrap()
        };
        let t1 = TemperGp::new(svgp(), &x_cal, &y_cal).unwrap().temperature();
        let t2 = TemperGp::new(svgp(), &x_cal, &y_cal).unwrap().temperature();
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_bad_calibration_data() {
        let svgp = SparseVariationalGp::new(
            LinearKernel::default(),
            GaussianLikelihood::default(),
            x_train(),
            1e-4,
        )
        .unwrap();
        let (x_cal, _) = calibration();
        let res = TemperGp::new(svgp, &x_cal, &array![1.0]);
        assert!(res.unwrap_err().is_configuration_error());
    }
}
