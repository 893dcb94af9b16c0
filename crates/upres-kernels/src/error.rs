//! Error types for resampling operations.

use thiserror::Error;

/// Error type for resampling operations.
#[derive(Error, Debug)]
pub enum KernelError {
    /// Invalid target dimensions.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Scale outside the range a kernel accepts.
    #[error("invalid scale: {0}")]
    InvalidScale(String),

    /// Unknown algorithm name.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Result type for resampling operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl From<KernelError> for upres_core::Error {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::UnknownAlgorithm(_) => upres_core::Error::invalid_input(err.to_string()),
            // Dimension and scale mismatches inside the pipeline mean the
            // planner produced inconsistent geometry.
            other => upres_core::Error::invariant(other.to_string()),
        }
    }
}
