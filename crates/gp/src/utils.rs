use crate::errors::{GpError, Result};
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A structure to store (n, xdim) matrix data and its mean and standard deviation vectors.
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct NormalizedData<F: Float> {
    /// normalized data
    pub data: Array2<F>,
    /// mean vector computed from data
    pub mean: Array1<F>,
    /// standard deviation vector computed from data
    pub std: Array1<F>,
}

impl<F: Float> Clone for NormalizedData<F> {
    fn clone(&self) -> NormalizedData<F> {
        NormalizedData {
            data: self.data.to_owned(),
            mean: self.mean.to_owned(),
            std: self.std.to_owned(),
        }
    }
}

impl<F: Float> NormalizedData<F> {
    /// Constructor
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<NormalizedData<F>> {
        let (data, mean, std) = normalize(x)?;
        Ok(NormalizedData { data, mean, std })
    }

    /// Normalize other data with the statistics of this one
    pub fn transform(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        (x - &self.mean) / &self.std
    }

    /// Dimension of data points
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }
}

/// Column-wise standardization, zero deviations being replaced by one
pub fn normalize<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<(Array2<F>, Array1<F>, Array1<F>)> {
    let x_mean = x.mean_axis(Axis(0)).ok_or_else(|| {
        GpError::ConfigurationError("Cannot normalize an empty matrix".to_string())
    })?;
    let ddof = if x.nrows() > 1 { F::one() } else { F::zero() };
    let mut x_std = x.std_axis(Axis(0), ddof);
    x_std.mapv_inplace(|v| if v == F::zero() { F::one() } else { v });
    let xnorm = (x - &x_mean) / &x_std;

    Ok((xnorm, x_mean, x_std))
}

/// Lower cholesky factor of `mat + jitter * I`
///
/// Fails with a [`GpError::NumericalError`] naming `what` when the matrix is not
/// positive definite even after jitter.
pub fn cholesky_with_jitter<F: Float>(
    mat: &ArrayBase<impl Data<Elem = F>, Ix2>,
    jitter: F,
    what: &str,
) -> Result<Array2<F>> {
    let mut jittered = mat.to_owned();
    jittered.diag_mut().mapv_inplace(|v| v + jitter);
    if jittered.iter().any(|v| !v.is_finite()) {
        return Err(GpError::NumericalError(format!(
            "NaN or Inf detected in {} matrix",
            what
        )));
    }
    let chol = jittered.cholesky().map_err(|e| {
        GpError::NumericalError(format!(
            "{} matrix is not positive definite with jitter {}: {}",
            what, jitter, e
        ))
    })?;
    // singular matrices may factorize with a zero pivot
    if chol.diag().iter().any(|v| !(*v > F::zero()) || !v.is_finite()) {
        return Err(GpError::NumericalError(format!(
            "{} matrix is singular with jitter {}",
            what, jitter
        )));
    }
    Ok(chol)
}

/// Solve `A X = B` given the lower cholesky factor `L` of `A`
pub fn cho_solve<F: Float>(
    chol: &ArrayBase<impl Data<Elem = F>, Ix2>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    let z = chol.solve_triangular(b, UPLO::Lower)?;
    Ok(chol.t().solve_triangular_into(z, UPLO::Upper)?)
}

/// Inverse of a lower triangular matrix
pub fn lower_inverse<F: Float>(chol: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
    Ok(chol.solve_triangular(&Array2::eye(chol.nrows()), UPLO::Lower)?)
}
