//! # upres-io
//!
//! Codec adapter for the upres upscaling engine.
//!
//! The scaling pipeline consumes images as bytes and returns bytes; this
//! crate is the boundary that decodes, encodes, and manipulates those
//! bytes. Supported formats:
//!
//! - **PNG** - lossless, used for final output and fast intermediates
//! - **JPEG** - lossy with quality 1-100
//! - **TIFF** - LZW or uncompressed
//! - **WebP** - via the `image` crate (lossless encoder)
//!
//! # Architecture
//!
//! All operations go through an explicit [`CodecAdapter`] handle passed to
//! the pipeline; there is no process-wide codec state. Each format lives
//! in its own module with `decode` / `decode_dimensions` / `encode`
//! functions.
//!
//! # Example
//!
//! ```ignore
//! use upres_io::{CodecAdapter, OutputEncoding};
//!
//! let codec = CodecAdapter::new();
//! let meta = codec.decode_metadata(&bytes)?;
//! let image = codec.decode_pixels(&bytes)?;
//! let out = codec.encode(&image, &OutputEncoding::png())?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod adapter;
mod error;
mod format;
pub mod jpeg;
pub mod png;
pub mod tiff;
pub mod webp;

pub use adapter::CodecAdapter;
pub use error::{IoError, IoResult};
pub use format::{
    ImageFormat, ImageMetadata, OutputEncoding, PngCompression, TiffCompression,
};
