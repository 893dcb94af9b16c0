//! # upres-core
//!
//! Core types for the upres image-upscaling engine.
//!
//! This crate provides the foundational types used throughout the upres
//! workspace:
//!
//! - [`Image`] - Owned interleaved f32 image buffer
//! - [`Rect`] - Pixel rectangle used for tile geometry
//! - [`Error`] - Session-level error taxonomy
//! - [`Stage`], [`ProgressEvent`], [`ProgressSender`], [`ProgressStream`] -
//!   progress reporting contract
//! - [`SessionState`], [`CancellationToken`] - session lifecycle
//!
//! ## Crate Structure
//!
//! `upres-core` is the foundation of the workspace and has no internal
//! dependencies. All other upres crates depend on it:
//!
//! ```text
//! upres-core (this crate)
//!    ^
//!    |
//!    +-- upres-kernels (resampling)
//!    +-- upres-io (codecs)
//!    +-- upres-engine (policy, tiling, pooling, backends)
//!    +-- upres-cli
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod image;
pub mod progress;
pub mod rect;
pub mod session;

pub use error::{Error, ErrorKind, Result};
pub use image::Image;
pub use progress::{ProgressEvent, ProgressSender, ProgressStream, Stage, StageStats};
pub use rect::Rect;
pub use session::{CancellationToken, SessionState};
