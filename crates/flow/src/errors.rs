use pwgf_gp::GpError;
use thiserror::Error;

/// A result type for gradient flow algorithms
pub type Result<T> = std::result::Result<T, FlowError>;

/// An error when using projected Wasserstein gradient flows
#[derive(Error, Debug)]
pub enum FlowError {
    /// When kernels or gaussian process models fail
    #[error(transparent)]
    GpError(#[from] GpError),
    /// When the particle matrix does not match the induce points
    #[error("Particle shape error: expected {expected:?}, got {actual:?}")]
    ParticleShapeError {
        /// Expected (number of induce points, number of particles)
        expected: (usize, usize),
        /// Actual particle matrix shape
        actual: (usize, usize),
    },
    /// When a snapshot was written with an unsupported format version
    #[error("Snapshot version error: expected {expected}, got {actual}")]
    SnapshotVersionError {
        /// Supported version
        expected: u32,
        /// Snapshot version
        actual: u32,
    },
    /// When the argmin framework fails
    #[error(transparent)]
    ArgminError(#[from] argmin::core::Error),
    /// When error during saving or loading
    #[cfg(feature = "persistent")]
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When error during loading
    #[cfg(feature = "persistent")]
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
}

impl From<linfa_linalg::LinalgError> for FlowError {
    fn from(err: linfa_linalg::LinalgError) -> Self {
        FlowError::GpError(GpError::LinalgError(err))
    }
}

impl From<linfa::error::Error> for FlowError {
    fn from(err: linfa::error::Error) -> Self {
        FlowError::GpError(GpError::LinfaError(err))
    }
}

impl FlowError {
    /// Shortcut for a [`GpError::ConfigurationError`]
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        FlowError::GpError(GpError::ConfigurationError(msg.into()))
    }

    /// Shortcut for a [`GpError::NumericalError`]
    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        FlowError::GpError(GpError::NumericalError(msg.into()))
    }

    /// Whether the error is a configuration error (shape, count or version mismatch)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FlowError::GpError(GpError::ConfigurationError(_))
                | FlowError::ParticleShapeError { .. }
                | FlowError::SnapshotVersionError { .. }
        )
    }

    /// Whether the error is a fatal numerical error
    pub fn is_numerical_error(&self) -> bool {
        matches!(
            self,
            FlowError::GpError(GpError::NumericalError(_)) | FlowError::GpError(GpError::LinalgError(_))
        )
    }
}

impl From<FlowError> for GpError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::GpError(err) => err,
            other => GpError::ConfigurationError(other.to_string()),
        }
    }
}
