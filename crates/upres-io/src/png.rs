//! PNG decode and encode.
//!
//! PNG is the pipeline's workhorse: final output defaults to it and
//! progressive intermediates are held as fastest-compression PNG between
//! stages. Grayscale inputs are expanded to RGB(A); 16-bit inputs are
//! scaled into the f32 working range.

use std::io::Cursor;

use upres_core::Image;

use crate::format::PngCompression;
use crate::{IoError, IoResult};

impl PngCompression {
    fn to_png(self) -> png::Compression {
        match self {
            PngCompression::Fast => png::Compression::Fast,
            PngCompression::Default => png::Compression::Balanced,
            PngCompression::Best => png::Compression::High,
        }
    }
}

/// Reads (width, height, channels) from the PNG header.
pub fn decode_dimensions(bytes: &[u8]) -> IoResult<(u32, u32, u8)> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let reader = decoder
        .read_info()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    let info = reader.info();
    let channels = match info.color_type {
        png::ColorType::Rgb | png::ColorType::Grayscale | png::ColorType::Indexed => 3,
        png::ColorType::Rgba | png::ColorType::GrayscaleAlpha => 4,
    };
    Ok((info.width, info.height, channels))
}

/// Decodes PNG bytes into an f32 image.
pub fn decode(bytes: &[u8]) -> IoResult<Image> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder
        .read_info()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;

    let buf_size = reader
        .output_buffer_size()
        .ok_or_else(|| IoError::DecodeError("cannot determine buffer size".into()))?;
    let mut buf = vec![0u8; buf_size];
    let output_info = reader
        .next_frame(&mut buf)
        .map_err(|e| IoError::DecodeError(e.to_string()))?;

    let width = output_info.width;
    let height = output_info.height;
    let raw = &buf[..output_info.buffer_size()];

    let (channels, data): (u8, Vec<f32>) = match (output_info.color_type, output_info.bit_depth) {
        (png::ColorType::Rgb, png::BitDepth::Eight) => (3, u8_to_f32(raw)),
        (png::ColorType::Rgba, png::BitDepth::Eight) => (4, u8_to_f32(raw)),
        (png::ColorType::Rgb, png::BitDepth::Sixteen) => (3, u16_be_to_f32(raw)),
        (png::ColorType::Rgba, png::BitDepth::Sixteen) => (4, u16_be_to_f32(raw)),
        (png::ColorType::Grayscale, png::BitDepth::Eight) => {
            let rgb: Vec<f32> = raw
                .iter()
                .flat_map(|&g| {
                    let v = f32::from(g) / 255.0;
                    [v, v, v]
                })
                .collect();
            (3, rgb)
        }
        (png::ColorType::GrayscaleAlpha, png::BitDepth::Eight) => {
            let rgba: Vec<f32> = raw
                .chunks_exact(2)
                .flat_map(|ga| {
                    let g = f32::from(ga[0]) / 255.0;
                    let a = f32::from(ga[1]) / 255.0;
                    [g, g, g, a]
                })
                .collect();
            (4, rgba)
        }
        (color_type, bit_depth) => {
            return Err(IoError::UnsupportedLayout(format!(
                "PNG {color_type:?} {bit_depth:?}"
            )));
        }
    };

    Image::from_data(width, height, channels, data)
        .map_err(|e| IoError::DecodeError(e.to_string()))
}

/// Encodes an f32 image as 8-bit PNG.
pub fn encode(image: &Image, compression: PngCompression) -> IoResult<Vec<u8>> {
    let color_type = match image.channels() {
        3 => png::ColorType::Rgb,
        4 => png::ColorType::Rgba,
        c => {
            return Err(IoError::EncodeError(format!(
                "unsupported channel count: {c}"
            )));
        }
    };

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
    encoder.set_color(color_type);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(compression.to_png());

    let mut writer = encoder
        .write_header()
        .map_err(|e| IoError::EncodeError(e.to_string()))?;
    writer
        .write_image_data(&image.to_u8())
        .map_err(|e| IoError::EncodeError(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| IoError::EncodeError(e.to_string()))?;

    Ok(out)
}

fn u8_to_f32(raw: &[u8]) -> Vec<f32> {
    raw.iter().map(|&b| f32::from(b) / 255.0).collect()
}

fn u16_be_to_f32(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(2)
        .map(|pair| f32::from(u16::from_be_bytes([pair[0], pair[1]])) / 65535.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32, channels: u8) -> Image {
        let mut img = Image::new(w, h, channels);
        for y in 0..h {
            for x in 0..w {
                let v = if (x + y) % 2 == 0 { 1.0 } else { 0.0 };
                let px = [v, 1.0 - v, 0.5, 1.0];
                img.set_pixel(x, y, &px[..channels as usize]);
            }
        }
        img
    }

    #[test]
    fn test_round_trip_rgb() {
        let img = checker(16, 9, 3);
        let bytes = encode(&img, PngCompression::Default).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (16, 9));
        assert_eq!(back.channels(), 3);
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn test_round_trip_rgba() {
        let img = checker(8, 8, 4);
        let bytes = encode(&img, PngCompression::Fast).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn test_decode_dimensions_without_pixels() {
        let img = checker(33, 21, 3);
        let bytes = encode(&img, PngCompression::Best).unwrap();
        assert_eq!(decode_dimensions(&bytes).unwrap(), (33, 21, 3));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(&[0u8; 64]).is_err());
    }
}
