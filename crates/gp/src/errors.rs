use thiserror::Error;

/// A result type for GP regression algorithms
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`ExactGp`](crate::ExactGp) or [`SparseVariationalGp`](crate::SparseVariationalGp) algorithms
#[derive(Error, Debug)]
pub enum GpError {
    /// When shapes, counts or parameter values are invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// When a matrix is not positive definite even after jitter, or NaN/Inf shows up
    #[error("Numerical error: {0}")]
    NumericalError(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
