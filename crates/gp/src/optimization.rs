use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix1, Zip};
use ndarray_stats::QuantileExt;

/// Adam first-order optimizer over a flat parameter vector
#[derive(Clone, Debug)]
pub struct Adam<F: Float> {
    learning_rate: F,
    beta1: F,
    beta2: F,
    epsilon: F,
    step: i32,
    m: Array1<F>,
    v: Array1<F>,
}

impl<F: Float> Adam<F> {
    /// Optimizer for `n_params` parameters with default moment decays (0.9, 0.999)
    pub fn new(n_params: usize, learning_rate: F) -> Self {
        Adam {
            learning_rate,
            beta1: F::cast(0.9),
            beta2: F::cast(0.999),
            epsilon: F::cast(1e-8),
            step: 0,
            m: Array1::zeros(n_params),
            v: Array1::zeros(n_params),
        }
    }

    /// Learning rate
    pub fn learning_rate(&self) -> F {
        self.learning_rate
    }

    /// Update `params` in place given the gradient `grad` of the minimized objective
    pub fn step(
        &mut self,
        params: &mut Array1<F>,
        grad: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.m.len() {
            return Err(GpError::ConfigurationError(format!(
                "Adam expects {} parameters, got params={} grad={}",
                self.m.len(),
                params.len(),
                grad.len()
            )));
        }
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(GpError::NumericalError(
                "NaN or Inf detected in gradient".to_string(),
            ));
        }
        self.step += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        Zip::from(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|m, v, &g| {
                *m = b1 * *m + (F::one() - b1) * g;
                *v = b2 * *v + (F::one() - b2) * g * g;
            });
        let bias1 = F::one() - b1.powi(self.step);
        let bias2 = F::one() - b2.powi(self.step);
        let (lr, eps) = (self.learning_rate, self.epsilon);
        Zip::from(params)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| {
                *p -= lr * (m / bias1) / ((v / bias2).sqrt() + eps);
            });
        Ok(())
    }
}

/// `n` learning rates evenly spaced in log scale between `lower` and `upper` (both included)
pub fn learning_rate_grid<F: Float>(lower: F, upper: F, n: usize) -> Result<Array1<F>> {
    if n == 0 {
        return Err(GpError::ConfigurationError(
            "Number of learning rate searches should be positive".to_string(),
        ));
    }
    if !(lower > F::zero()) || !(upper >= lower) {
        return Err(GpError::ConfigurationError(format!(
            "Learning rate bounds should verify 0 < lower <= upper, got ({}, {})",
            lower, upper
        )));
    }
    if n == 1 {
        return Ok(Array1::from_elem(1, lower));
    }
    let (lo, up) = (lower.ln(), upper.ln());
    Ok(Array1::linspace(lo, up, n).mapv(|v| v.exp()))
}

/// Index of the smallest finite value, first one wins on ties.
/// Returns `None` when no value is finite.
pub fn argmin_finite<F: Float>(values: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Option<usize> {
    let masked = values.mapv(|v| if v.is_finite() { v } else { F::infinity() });
    match masked.argmin() {
        Ok(i) if masked[i].is_finite() => Some(i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_adam_quadratic() {
        let target = array![1.0, -2.0, 0.5];
        let mut params = Array1::<f64>::zeros(3);
        let mut adam = Adam::new(3, 0.05);
        for _ in 0..2000 {
            let grad = 2. * (&params - &target);
            adam.step(&mut params, &grad).unwrap();
        }
        assert_abs_diff_eq!(params, target, epsilon = 1e-3);
    }

    #[test]
    fn test_adam_rejects_nan() {
        let mut params = Array1::<f64>::zeros(2);
        let mut adam = Adam::new(2, 0.1);
        assert!(adam.step(&mut params, &array![f64::NAN, 0.]).is_err());
    }

    #[test]
    fn test_learning_rate_grid() {
        let grid = learning_rate_grid(1e-3, 1e-1, 3).unwrap();
        assert_abs_diff_eq!(grid, array![1e-3, 1e-2, 1e-1], epsilon = 1e-12);
        let grid = learning_rate_grid(1e-3, 1e-1, 1).unwrap();
        assert_abs_diff_eq!(grid, array![1e-3]);
        assert!(learning_rate_grid(0., 1e-1, 3).is_err());
        assert!(learning_rate_grid(1e-1, 1e-3, 3).is_err());
        assert!(learning_rate_grid(1e-3, 1e-1, 0).is_err());
    }

    #[test]
    fn test_argmin_finite_ties() {
        assert_eq!(argmin_finite(&array![3., 1., 1., f64::NAN]), Some(1));
        assert_eq!(argmin_finite(&array![f64::NAN, f64::INFINITY]), None);
    }
}
