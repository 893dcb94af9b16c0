//! The codec adapter handle consumed by the scaling pipeline.

use tracing::debug;
use upres_core::{Image, Rect};

use crate::format::{ImageFormat, ImageMetadata, OutputEncoding, PngCompression};
use crate::{jpeg, png, tiff, webp, IoError, IoResult};

/// Explicit codec handle.
///
/// The pipeline never touches a codec directly; every decode, encode,
/// region extraction, and composite goes through an adapter instance the
/// caller passes in. The adapter is stateless and cheap to clone.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecAdapter;

impl CodecAdapter {
    /// Creates a new adapter.
    pub fn new() -> Self {
        Self
    }

    /// Reads image metadata without decoding pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::UnsupportedFormat`] for unknown signatures and
    /// [`IoError::DecodeError`] for corrupted headers.
    pub fn decode_metadata(&self, bytes: &[u8]) -> IoResult<ImageMetadata> {
        let format = ImageFormat::from_magic_bytes(bytes)?;
        let (width, height, channels) = match format {
            ImageFormat::Png => png::decode_dimensions(bytes)?,
            ImageFormat::Jpeg => jpeg::decode_dimensions(bytes)?,
            ImageFormat::Tiff => tiff::decode_dimensions(bytes)?,
            ImageFormat::WebP => webp::decode_dimensions(bytes)?,
        };
        if width == 0 || height == 0 {
            return Err(IoError::DecodeError(format!(
                "degenerate dimensions {width}x{height}"
            )));
        }
        Ok(ImageMetadata {
            width,
            height,
            channels,
            format,
        })
    }

    /// Decodes bytes into an f32 working image.
    pub fn decode_pixels(&self, bytes: &[u8]) -> IoResult<Image> {
        let format = ImageFormat::from_magic_bytes(bytes)?;
        debug!(format = %format, "decoding pixels");
        match format {
            ImageFormat::Png => png::decode(bytes),
            ImageFormat::Jpeg => jpeg::decode(bytes),
            ImageFormat::Tiff => tiff::decode(bytes),
            ImageFormat::WebP => webp::decode(bytes),
        }
    }

    /// Encodes an image with the given output encoding.
    pub fn encode(&self, image: &Image, encoding: &OutputEncoding) -> IoResult<Vec<u8>> {
        debug!(
            format = %encoding.format(),
            width = image.width(),
            height = image.height(),
            "encoding output"
        );
        match encoding {
            OutputEncoding::Png { compression } => png::encode(image, *compression),
            OutputEncoding::Jpeg { quality } => jpeg::encode(image, *quality),
            OutputEncoding::Tiff { compression } => tiff::encode(image, *compression),
            OutputEncoding::WebP { .. } => webp::encode(image),
        }
    }

    /// Decodes a rectangular region out of encoded bytes, returning the
    /// region as fastest-compression PNG bytes.
    pub fn extract_region(
        &self,
        bytes: &[u8],
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> IoResult<Vec<u8>> {
        let image = self.decode_pixels(bytes)?;
        let region = Rect::new(left, top, width, height);
        if region.is_empty()
            || region.right() > image.width()
            || region.bottom() > image.height()
        {
            return Err(IoError::InvalidRegion(format!(
                "{width}x{height}+{left}+{top} outside {}x{}",
                image.width(),
                image.height()
            )));
        }
        let tile = image
            .extract(region)
            .map_err(|e| IoError::InvalidRegion(e.to_string()))?;
        png::encode(&tile, PngCompression::Fast)
    }

    /// Pastes encoded tiles onto an encoded canvas, returning the updated
    /// canvas as fastest-compression PNG bytes.
    ///
    /// Tiles are given as `(bytes, left, top)` and must lie fully inside
    /// the canvas.
    pub fn composite(
        &self,
        canvas_bytes: &[u8],
        tiles: &[(Vec<u8>, u32, u32)],
    ) -> IoResult<Vec<u8>> {
        let mut canvas = self.decode_pixels(canvas_bytes)?;
        for (tile_bytes, left, top) in tiles {
            let tile = self.decode_pixels(tile_bytes)?;
            canvas
                .paste(&tile, *left, *top)
                .map_err(|e| IoError::InvalidRegion(e.to_string()))?;
        }
        png::encode(&canvas, PngCompression::Fast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png(w: u32, h: u32) -> Vec<u8> {
        let mut img = Image::new(w, h, 3);
        for y in 0..h {
            for x in 0..w {
                img.set_pixel(x, y, &[x as f32 / w as f32, y as f32 / h as f32, 0.5]);
            }
        }
        png::encode(&img, PngCompression::Default).unwrap()
    }

    #[test]
    fn test_metadata_round_trip() {
        let bytes = sample_png(30, 20);
        let codec = CodecAdapter::new();
        let meta = codec.decode_metadata(&bytes).unwrap();
        assert_eq!(meta.width, 30);
        assert_eq!(meta.height, 20);
        assert_eq!(meta.channels, 3);
        assert_eq!(meta.format, ImageFormat::Png);
    }

    #[test]
    fn test_unknown_bytes_rejected() {
        let codec = CodecAdapter::new();
        assert!(matches!(
            codec.decode_metadata(&[0u8; 32]),
            Err(IoError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_extract_region() {
        let bytes = sample_png(16, 16);
        let codec = CodecAdapter::new();
        let region = codec.extract_region(&bytes, 4, 4, 8, 8).unwrap();
        let meta = codec.decode_metadata(&region).unwrap();
        assert_eq!((meta.width, meta.height), (8, 8));

        assert!(codec.extract_region(&bytes, 12, 12, 8, 8).is_err());
    }

    #[test]
    fn test_composite() {
        let codec = CodecAdapter::new();
        let canvas = sample_png(16, 16);
        let tile = codec.extract_region(&canvas, 0, 0, 4, 4).unwrap();
        let out = codec.composite(&canvas, &[(tile, 8, 8)]).unwrap();
        let meta = codec.decode_metadata(&out).unwrap();
        assert_eq!((meta.width, meta.height), (16, 16));
    }

    #[test]
    fn test_encode_formats() {
        let codec = CodecAdapter::new();
        let img = codec.decode_pixels(&sample_png(12, 12)).unwrap();
        for encoding in [
            OutputEncoding::png(),
            OutputEncoding::jpeg(85),
            OutputEncoding::Tiff {
                compression: crate::TiffCompression::Lzw,
            },
            OutputEncoding::WebP { quality: 80 },
        ] {
            let bytes = codec.encode(&img, &encoding).unwrap();
            let meta = codec.decode_metadata(&bytes).unwrap();
            assert_eq!(meta.format, encoding.format());
            assert_eq!((meta.width, meta.height), (12, 12));
        }
    }
}
