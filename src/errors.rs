use pwgf_flow::FlowError;
use pwgf_gp::GpError;
use thiserror::Error;

/// A result type for experiments
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// An error when setting up or running an experiment
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// When data or configuration values are inconsistent
    #[error("Invalid experiment: {0}")]
    InvalidValue(String),
    /// When a gaussian process model fails
    #[error(transparent)]
    GpError(#[from] GpError),
    /// When a gradient flow fails
    #[error(transparent)]
    FlowError(#[from] FlowError),
}
