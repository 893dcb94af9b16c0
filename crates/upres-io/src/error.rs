//! Error types for codec operations.

use std::io;
use thiserror::Error;

/// Codec operation error.
#[derive(Debug, Error)]
pub enum IoError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bytes do not match any supported format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Encoding error.
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Bit depth or color type the pipeline cannot carry.
    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    /// Region arguments outside the image.
    #[error("invalid region: {0}")]
    InvalidRegion(String),
}

/// Result type for codec operations.
pub type IoResult<T> = Result<T, IoError>;

impl From<IoError> for upres_core::Error {
    fn from(err: IoError) -> Self {
        upres_core::Error::invalid_input(err.to_string())
    }
}
