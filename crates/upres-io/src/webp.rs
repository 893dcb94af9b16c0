//! WebP decode and encode via the `image` crate.
//!
//! The `image` crate's WebP encoder only supports lossless mode; the
//! quality option is accepted for interface parity and ignored.

use std::io::Cursor;

use image::DynamicImage;
use upres_core::Image;

use crate::{IoError, IoResult};

/// Reads (width, height, channels) from the WebP header.
///
/// Channel count is reported as 4: WebP containers do not expose the
/// alpha flag without decoding, and 4 is the conservative value for
/// memory estimates.
pub fn decode_dimensions(bytes: &[u8]) -> IoResult<(u32, u32, u8)> {
    let reader = image::ImageReader::with_format(Cursor::new(bytes), image::ImageFormat::WebP);
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    Ok((width, height, 4))
}

/// Decodes WebP bytes into an f32 image.
pub fn decode(bytes: &[u8]) -> IoResult<Image> {
    let dyn_img = image::load_from_memory_with_format(bytes, image::ImageFormat::WebP)
        .map_err(|e| IoError::DecodeError(e.to_string()))?;

    let (width, height) = (dyn_img.width(), dyn_img.height());
    let (channels, raw): (u8, Vec<u8>) = match dyn_img {
        DynamicImage::ImageRgb8(rgb) => (3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (4, rgba.into_raw()),
        other => (4, other.to_rgba8().into_raw()),
    };

    Image::from_u8(width, height, channels, &raw)
        .map_err(|e| IoError::DecodeError(e.to_string()))
}

/// Encodes an f32 image as lossless WebP.
pub fn encode(image: &Image) -> IoResult<Vec<u8>> {
    let data = image.to_u8();
    let dyn_img = match image.channels() {
        3 => image::RgbImage::from_raw(image.width(), image.height(), data)
            .map(DynamicImage::ImageRgb8),
        4 => image::RgbaImage::from_raw(image.width(), image.height(), data)
            .map(DynamicImage::ImageRgba8),
        c => {
            return Err(IoError::EncodeError(format!(
                "unsupported channel count: {c}"
            )));
        }
    }
    .ok_or_else(|| IoError::EncodeError("buffer size mismatch".into()))?;

    let mut out = Cursor::new(Vec::new());
    let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut out);
    dyn_img
        .write_with_encoder(encoder)
        .map_err(|e| IoError::EncodeError(e.to_string()))?;

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripes(w: u32, h: u32) -> Image {
        let mut img = Image::new(w, h, 3);
        for y in 0..h {
            for x in 0..w {
                let v = (y % 2) as f32;
                img.set_pixel(x, y, &[v, 0.25, 1.0 - v]);
            }
        }
        img
    }

    #[test]
    fn test_lossless_round_trip() {
        let img = stripes(24, 16);
        let bytes = encode(&img).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (24, 16));
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn test_decode_dimensions() {
        let img = stripes(10, 6);
        let bytes = encode(&img).unwrap();
        let (w, h, _) = decode_dimensions(&bytes).unwrap();
        assert_eq!((w, h), (10, 6));
    }
}
