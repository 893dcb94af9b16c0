//! Format detection and encode options.

use std::fmt;
use std::str::FromStr;

use crate::{IoError, IoResult};

/// Supported raster formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG format.
    Png,
    /// JPEG format.
    Jpeg,
    /// TIFF format.
    Tiff,
    /// WebP format.
    WebP,
}

impl ImageFormat {
    /// Detects the format from magic bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::UnsupportedFormat`] if the signature matches no
    /// supported format.
    pub fn from_magic_bytes(bytes: &[u8]) -> IoResult<Self> {
        if bytes.len() < 12 {
            return Err(IoError::UnsupportedFormat(
                "fewer than 12 bytes, cannot identify".into(),
            ));
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Ok(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Ok(Self::Jpeg)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Ok(Self::Tiff)
        } else if &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Ok(Self::WebP)
        } else {
            Err(IoError::UnsupportedFormat(format!(
                "unrecognized signature {:02x?}",
                &bytes[..4.min(bytes.len())]
            )))
        }
    }

    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        };
        f.write_str(name)
    }
}

impl FromStr for ImageFormat {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "tiff" | "tif" => Ok(Self::Tiff),
            "webp" => Ok(Self::WebP),
            other => Err(IoError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Metadata read without decoding pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channel count the decode will produce (3 or 4).
    pub channels: u8,
    /// Detected format.
    pub format: ImageFormat,
}

impl ImageMetadata {
    /// Total pixel count.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Aspect ratio as max(w, h) / min(w, h).
    pub fn aspect_ratio(&self) -> f64 {
        let long = self.width.max(self.height) as f64;
        let short = self.width.min(self.height) as f64;
        long / short
    }
}

/// PNG compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PngCompression {
    /// Fastest encoding; used for in-memory intermediates.
    Fast,
    /// Balanced speed and size.
    #[default]
    Default,
    /// Maximum compression.
    Best,
}

/// TIFF compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiffCompression {
    /// LZW compression.
    #[default]
    Lzw,
    /// No compression.
    None,
}

impl FromStr for TiffCompression {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lzw" => Ok(Self::Lzw),
            "none" => Ok(Self::None),
            other => Err(IoError::UnsupportedFormat(format!(
                "tiff compression {other}"
            ))),
        }
    }
}

/// Output encoding: a format plus its format-specific options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEncoding {
    /// PNG with a compression level.
    Png {
        /// Compression level.
        compression: PngCompression,
    },
    /// JPEG with quality 1-100.
    Jpeg {
        /// Quality 1-100.
        quality: u8,
    },
    /// TIFF with a compression scheme.
    Tiff {
        /// Compression scheme.
        compression: TiffCompression,
    },
    /// WebP. The encoder is lossless; `quality` is accepted for interface
    /// parity and ignored.
    WebP {
        /// Quality 1-100 (currently ignored by the lossless encoder).
        quality: u8,
    },
}

impl OutputEncoding {
    /// PNG at the default compression level.
    pub fn png() -> Self {
        Self::Png {
            compression: PngCompression::Default,
        }
    }

    /// PNG at the fastest compression level, for intermediates.
    pub fn png_fast() -> Self {
        Self::Png {
            compression: PngCompression::Fast,
        }
    }

    /// JPEG at the given quality, clamped to 1-100.
    pub fn jpeg(quality: u8) -> Self {
        Self::Jpeg {
            quality: quality.clamp(1, 100),
        }
    }

    /// The target format.
    pub fn format(&self) -> ImageFormat {
        match self {
            Self::Png { .. } => ImageFormat::Png,
            Self::Jpeg { .. } => ImageFormat::Jpeg,
            Self::Tiff { .. } => ImageFormat::Tiff,
            Self::WebP { .. } => ImageFormat::WebP,
        }
    }

    /// Whether a decode of this encoding reproduces pixels exactly.
    pub fn is_lossless(&self) -> bool {
        !matches!(self, Self::Jpeg { .. })
    }
}

impl Default for OutputEncoding {
    fn default() -> Self {
        Self::png()
    }
}
