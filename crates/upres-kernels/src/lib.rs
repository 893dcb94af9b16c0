//! # upres-kernels
//!
//! Resampling kernels for the upres upscaling engine.
//!
//! # Kernels
//!
//! - [`Filter::Bilinear`] - Linear interpolation (2x2 support)
//! - [`Filter::CatmullRom`] - Bicubic with Catmull-Rom weights (4x4 support)
//! - [`Filter::Lanczos2`] - Windowed sinc, a = 2 (4x4 support)
//! - [`Filter::Lanczos3`] - Windowed sinc, a = 3 (6x6 support)
//! - [`fractional::scale_1_1x`] - Bilinear with perceptual smoothing for
//!   sub-1.2x steps
//! - [`fractional::scale_1_5x`] - Edge-aware weighting for sub-1.8x steps
//!
//! All kernels operate channel-wise on f32 storage in [0, 1] with
//! clamp-to-edge addressing and weight normalization; outputs are clamped
//! back to [0, 1].
//!
//! # Example
//!
//! ```rust
//! use upres_core::Image;
//! use upres_kernels::{resample, Filter};
//!
//! let src = Image::new(64, 64, 3);
//! let dst = resample(&src, 128, 128, Filter::CatmullRom).unwrap();
//! assert_eq!(dst.dimensions(), (128, 128));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
pub mod filter;
pub mod fractional;
pub mod resample;
pub mod select;

pub use error::{KernelError, KernelResult};
pub use filter::Filter;
pub use resample::resample;
pub use select::Algorithm;
