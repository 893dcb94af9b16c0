//! Session lifecycle and cancellation.
//!
//! A session moves `Queued -> Processing -> (Complete | Error)`. The state
//! itself is a plain value; the transport that accepted the request owns
//! the registry and the post-completion retention window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ErrorKind;

/// Minimum time a finished session's result stays retrievable.
pub const RESULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Lifecycle state of an upscaling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, not yet started.
    Queued,
    /// Pipeline running.
    Processing,
    /// Finished successfully; result retained for at least
    /// [`RESULT_RETENTION`].
    Complete,
    /// Terminated; no output was produced.
    Error(ErrorKind),
}

impl SessionState {
    /// Returns `true` once the session can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }
}

/// Cooperative cancellation flag shared across workers.
///
/// Workers poll the token between tiles: cancellation lets the current
/// tile finish, then the worker exits. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
