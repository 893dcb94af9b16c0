//! Progress reporting contract.
//!
//! Every processing mode emits [`ProgressEvent`]s through a
//! [`ProgressSender`]. Events form a lazy finite sequence consumed through
//! [`ProgressStream`] (an [`Iterator`]); transports that want a callback
//! instead can drain the stream on their own thread.
//!
//! # Guarantees
//!
//! - `percent` is monotonic non-decreasing within a session; the sender
//!   clamps any regressing value.
//! - A successful session ends with exactly one `Complete` event at
//!   percent 100.
//! - A failed session ends with exactly one `Error` event.
//!
//! # Usage
//!
//! ```rust
//! use upres_core::progress::{channel, Stage};
//!
//! let (tx, rx) = channel();
//! tx.emit(Stage::Planning, 5.0, "planning stages");
//! tx.complete("done");
//! drop(tx);
//!
//! let events: Vec<_> = rx.collect();
//! assert_eq!(events.last().unwrap().percent, 100.0);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// Processing stage of a session. Closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Session accepted, input decoded.
    Initializing,
    /// Mode and stage plan being selected.
    Planning,
    /// Tile extraction from the source.
    Extracting,
    /// Kernel execution (per tile or per stage).
    Processing,
    /// Stitching processed tiles into the output canvas.
    Compositing,
    /// Encoding the final image.
    Encoding,
    /// Session finished successfully.
    Complete,
    /// Session terminated with an error.
    Error,
}

impl Stage {
    /// Short stable name, suitable for transports and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::Extracting => "extracting",
            Self::Processing => "processing",
            Self::Compositing => "compositing",
            Self::Encoding => "encoding",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// Structured stats attached to stage-transition events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageStats {
    /// Total number of tiles in the grid, if tiled.
    pub tiles_total: Option<u32>,
    /// Tiles completed so far, if tiled.
    pub tiles_completed: Option<u32>,
    /// Index of the current stage in a multi-stage plan.
    pub stage_index: Option<u32>,
    /// Total number of stages in a multi-stage plan.
    pub stages_total: Option<u32>,
    /// Peak allocated memory observed so far, in bytes.
    pub peak_memory_bytes: Option<u64>,
    /// Wall-clock time spent in the reported stage, in milliseconds.
    pub elapsed_ms: Option<u64>,
}

/// One progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Current stage.
    pub stage: Stage,
    /// Overall completion in [0, 100]; monotonic within a session.
    pub percent: f32,
    /// Single-line human-readable message.
    pub message: String,
    /// Optional structured stats.
    pub stats: Option<StageStats>,
}

/// Sending half of a progress channel.
///
/// Cloneable; all clones share the monotonicity watermark. Dropping every
/// sender ends the stream.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    // Centi-percent watermark shared across clones.
    watermark: Arc<AtomicU32>,
}

impl ProgressSender {
    /// Emits an event, clamping `percent` so the stream never regresses.
    ///
    /// Send failures are ignored: a dropped receiver means nobody is
    /// listening, which must not fail the pipeline.
    pub fn emit(&self, stage: Stage, percent: f32, message: impl Into<String>) {
        self.emit_with_stats(stage, percent, message, None);
    }

    /// Emits an event carrying structured stats.
    pub fn emit_with_stats(
        &self,
        stage: Stage,
        percent: f32,
        message: impl Into<String>,
        stats: Option<StageStats>,
    ) {
        let percent = self.advance(percent);
        let _ = self.tx.send(ProgressEvent {
            stage,
            percent,
            message: message.into(),
            stats,
        });
    }

    /// Emits the terminal `Complete` event at exactly 100 percent.
    pub fn complete(&self, message: impl Into<String>) {
        self.complete_with_stats(message, None);
    }

    /// Emits the terminal `Complete` event with stats.
    pub fn complete_with_stats(&self, message: impl Into<String>, stats: Option<StageStats>) {
        self.watermark.store(100_00, Ordering::Relaxed);
        let _ = self.tx.send(ProgressEvent {
            stage: Stage::Complete,
            percent: 100.0,
            message: message.into(),
            stats,
        });
    }

    /// Emits the terminal `Error` event.
    ///
    /// The percent of an error event holds at the watermark; it does not
    /// jump to 100.
    pub fn error(&self, kind: crate::ErrorKind, message: impl Into<String>) {
        let percent = self.watermark.load(Ordering::Relaxed) as f32 / 100.0;
        let _ = self.tx.send(ProgressEvent {
            stage: Stage::Error,
            percent,
            message: format!("{}: {}", kind.as_str(), message.into()),
            stats: None,
        });
    }

    /// Advances the shared watermark, returning the effective percent.
    fn advance(&self, percent: f32) -> f32 {
        let candidate = (percent.clamp(0.0, 100.0) * 100.0) as u32;
        let mut current = self.watermark.load(Ordering::Relaxed);
        loop {
            if candidate <= current {
                return current as f32 / 100.0;
            }
            match self.watermark.compare_exchange_weak(
                current,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate as f32 / 100.0,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Receiving half of a progress channel: a lazy finite sequence of events.
///
/// Iteration blocks until the next event arrives and ends when every
/// [`ProgressSender`] clone has been dropped. Non-restartable.
pub struct ProgressStream {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Receives the next event without blocking.
    pub fn try_next(&self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Iterator for ProgressStream {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().ok()
    }
}

/// Creates a connected progress sender/stream pair.
pub fn channel() -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::channel();
    (
        ProgressSender {
            tx,
            watermark: Arc::new(AtomicU32::new(0)),
        },
        ProgressStream { rx },
    )
}

/// Drains a stream into a callback on the current thread.
///
/// Convenience adapter for synchronous callers that prefer the callback
/// shape over iteration.
pub fn drain_into<F: FnMut(ProgressEvent)>(stream: ProgressStream, mut callback: F) {
    for event in stream {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_monotone() {
        let (tx, rx) = channel();
        tx.emit(Stage::Planning, 10.0, "a");
        tx.emit(Stage::Processing, 5.0, "b"); // regression clamped
        tx.emit(Stage::Processing, 20.0, "c");
        drop(tx);

        let percents: Vec<f32> = rx.map(|e| e.percent).collect();
        assert_eq!(percents, vec![10.0, 10.0, 20.0]);
    }

    #[test]
    fn test_complete_is_exactly_100() {
        let (tx, rx) = channel();
        tx.emit(Stage::Processing, 97.3, "almost");
        tx.complete("done");
        drop(tx);

        let events: Vec<_> = rx.collect();
        let last = events.last().unwrap();
        assert_eq!(last.stage, Stage::Complete);
        assert_eq!(last.percent, 100.0);
    }

    #[test]
    fn test_error_holds_watermark() {
        let (tx, rx) = channel();
        tx.emit(Stage::Processing, 35.0, "working");
        tx.error(crate::ErrorKind::Cancelled, "cancelled");
        drop(tx);

        let events: Vec<_> = rx.collect();
        let last = events.last().unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert_eq!(last.percent, 35.0);
        assert!(last.message.starts_with("cancelled"));
    }

    #[test]
    fn test_clones_share_watermark() {
        let (tx, rx) = channel();
        let tx2 = tx.clone();
        tx.emit(Stage::Processing, 50.0, "a");
        tx2.emit(Stage::Processing, 40.0, "b");
        drop(tx);
        drop(tx2);

        let percents: Vec<f32> = rx.map(|e| e.percent).collect();
        assert_eq!(percents, vec![50.0, 50.0]);
    }

    #[test]
    fn test_stream_ends_when_senders_drop() {
        let (tx, rx) = channel();
        tx.emit(Stage::Initializing, 0.0, "start");
        drop(tx);
        assert_eq!(rx.count(), 1);
    }
}
