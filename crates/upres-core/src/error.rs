//! Error types for upscaling sessions.
//!
//! A single [`Error`] enum covers every failure mode a session can surface:
//! malformed input, exhausted memory budgets, missing backends, bounded
//! operations exceeding their deadline, external enhancement failures,
//! cancellation, and internal invariant violations.
//!
//! Recoverable conditions (backend downgrade, hybrid handoff, enhancement
//! fallback) are handled by the engine before an `Error` ever reaches the
//! caller; anything surfaced here terminates the session.
//!
//! # Usage
//!
//! ```rust
//! use upres_core::{Error, Result};
//!
//! fn check_scale(scale: f64) -> Result<()> {
//!     if scale < 1.0 {
//!         return Err(Error::invalid_input(format!("scale {scale} must be >= 1.0")));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable, data-free classification of an [`Error`].
///
/// Progress consumers receive the kind alongside the final `error` event so
/// transports can map failures without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed image, invalid scale, or unknown format.
    InvalidInput,
    /// Memory exhausted after cleanup.
    OutOfBudget,
    /// A requested compute backend is not present.
    BackendUnavailable,
    /// A tile exceeded its processing deadline.
    TileTimeout,
    /// The external enhancement process exceeded its deadline.
    EnhanceTimeout,
    /// The external enhancement process failed.
    EnhanceFailed,
    /// The session was cancelled.
    Cancelled,
    /// Internal math inconsistency; always fatal.
    InternalInvariantViolated,
}

impl ErrorKind {
    /// Short stable name, suitable for telemetry fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::OutOfBudget => "out_of_budget",
            Self::BackendUnavailable => "backend_unavailable",
            Self::TileTimeout => "tile_timeout",
            Self::EnhanceTimeout => "enhance_timeout",
            Self::EnhanceFailed => "enhance_failed",
            Self::Cancelled => "cancelled",
            Self::InternalInvariantViolated => "internal_invariant_violated",
        }
    }
}

/// Errors that can terminate an upscaling session.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed image data, a scale below 1.0, or an unknown format.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What was wrong with the input.
        reason: String,
    },

    /// Memory exhausted after progressive cleanup.
    ///
    /// Raised by the memory manager when an allocation cannot be satisfied
    /// even after pooled buffers have been destroyed.
    #[error("out of memory budget: requested {requested} bytes, limit {limit} bytes")]
    OutOfBudget {
        /// Bytes requested by the failing allocation.
        requested: u64,
        /// Safe-memory ceiling in effect.
        limit: u64,
    },

    /// A requested compute backend is not available on this system.
    ///
    /// The policy engine recovers by downgrading GPU to CPU unless the
    /// caller forced the GPU backend.
    #[error("backend unavailable: {backend}")]
    BackendUnavailable {
        /// Name of the missing backend.
        backend: String,
    },

    /// A tile did not finish processing within its deadline.
    #[error("tile ({tx}, {ty}) exceeded {deadline_secs} s deadline")]
    TileTimeout {
        /// Tile X index.
        tx: u32,
        /// Tile Y index.
        ty: u32,
        /// Deadline that was exceeded, in seconds.
        deadline_secs: u64,
    },

    /// The external enhancement process exceeded its wall-clock deadline.
    #[error("enhancement process exceeded {deadline_secs} s deadline")]
    EnhanceTimeout {
        /// Deadline that was exceeded, in seconds.
        deadline_secs: u64,
    },

    /// The external enhancement process exited non-zero or produced no output.
    #[error("enhancement failed: {reason}")]
    EnhanceFailed {
        /// Exit status or missing-output description.
        reason: String,
    },

    /// The session was cancelled by the caller.
    #[error("session cancelled")]
    Cancelled,

    /// An internal consistency check failed.
    ///
    /// Examples: a stage plan whose product drifts from the target scale, or
    /// a stitch position outside the output canvas. Always fatal.
    #[error("internal invariant violated: {detail}")]
    InternalInvariantViolated {
        /// Description of the violated invariant.
        detail: String,
    },
}

impl Error {
    /// Creates an [`Error::InvalidInput`].
    #[inline]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::OutOfBudget`].
    #[inline]
    pub fn out_of_budget(requested: u64, limit: u64) -> Self {
        Self::OutOfBudget { requested, limit }
    }

    /// Creates an [`Error::BackendUnavailable`].
    #[inline]
    pub fn backend_unavailable(backend: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
        }
    }

    /// Creates an [`Error::EnhanceFailed`].
    #[inline]
    pub fn enhance_failed(reason: impl Into<String>) -> Self {
        Self::EnhanceFailed {
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::InternalInvariantViolated`].
    #[inline]
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InternalInvariantViolated {
            detail: detail.into(),
        }
    }

    /// Returns the data-free classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::OutOfBudget { .. } => ErrorKind::OutOfBudget,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::TileTimeout { .. } => ErrorKind::TileTimeout,
            Self::EnhanceTimeout { .. } => ErrorKind::EnhanceTimeout,
            Self::EnhanceFailed { .. } => ErrorKind::EnhanceFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InternalInvariantViolated { .. } => ErrorKind::InternalInvariantViolated,
        }
    }

    /// Returns `true` for budget exhaustion.
    #[inline]
    pub fn is_out_of_budget(&self) -> bool {
        matches!(self, Self::OutOfBudget { .. })
    }

    /// Returns `true` for cancellation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for enhancement failures that permit a traditional
    /// scaling fallback (failure or timeout, not cancellation).
    #[inline]
    pub fn is_enhance_fallback(&self) -> bool {
        matches!(self, Self::EnhanceFailed { .. } | Self::EnhanceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::invalid_input("bad").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            Error::out_of_budget(100, 50).kind(),
            ErrorKind::OutOfBudget
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_display_contains_context() {
        let err = Error::out_of_budget(2048, 1024);
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_enhance_fallback_predicate() {
        assert!(Error::enhance_failed("exit 1").is_enhance_fallback());
        assert!(Error::EnhanceTimeout { deadline_secs: 30 }.is_enhance_fallback());
        assert!(!Error::Cancelled.is_enhance_fallback());
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ErrorKind::OutOfBudget.as_str(), "out_of_budget");
        assert_eq!(ErrorKind::TileTimeout.as_str(), "tile_timeout");
    }
}
