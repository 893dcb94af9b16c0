//! TIFF decode and encode.
//!
//! Encoding supports LZW and uncompressed strips; decoding accepts 8-bit
//! and 16-bit gray/RGB/RGBA.

use std::io::Cursor;

use upres_core::Image;

use crate::format::TiffCompression;
use crate::{IoError, IoResult};

impl TiffCompression {
    fn to_tiff(self) -> tiff::encoder::Compression {
        match self {
            TiffCompression::Lzw => tiff::encoder::Compression::Lzw,
            TiffCompression::None => tiff::encoder::Compression::Uncompressed,
        }
    }
}

/// Reads (width, height, channels) from the TIFF directory.
pub fn decode_dimensions(bytes: &[u8]) -> IoResult<(u32, u32, u8)> {
    use tiff::decoder::Decoder;
    use tiff::ColorType;

    let mut decoder =
        Decoder::new(Cursor::new(bytes)).map_err(|e| IoError::DecodeError(e.to_string()))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    let channels = match decoder
        .colortype()
        .map_err(|e| IoError::DecodeError(e.to_string()))?
    {
        ColorType::Gray(_) | ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => {
            return Err(IoError::UnsupportedLayout(format!("TIFF {other:?}")));
        }
    };
    Ok((width, height, channels))
}

/// Decodes TIFF bytes into an f32 image.
pub fn decode(bytes: &[u8]) -> IoResult<Image> {
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::ColorType;

    let mut decoder =
        Decoder::new(Cursor::new(bytes)).map_err(|e| IoError::DecodeError(e.to_string()))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    let color = decoder
        .colortype()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    let result = decoder
        .read_image()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;

    let source_channels = match color {
        ColorType::Gray(_) => 1,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => {
            return Err(IoError::UnsupportedLayout(format!("TIFF {other:?}")));
        }
    };

    let normalized: Vec<f32> = match result {
        DecodingResult::U8(data) => data.iter().map(|&v| f32::from(v) / 255.0).collect(),
        DecodingResult::U16(data) => data.iter().map(|&v| f32::from(v) / 65535.0).collect(),
        other => {
            return Err(IoError::UnsupportedLayout(format!(
                "TIFF sample type {other:?}"
            )));
        }
    };

    let (channels, data) = if source_channels == 1 {
        // Expand grayscale to RGB.
        (3u8, normalized.iter().flat_map(|&v| [v, v, v]).collect())
    } else {
        (source_channels, normalized)
    };

    Image::from_data(width, height, channels, data)
        .map_err(|e| IoError::DecodeError(e.to_string()))
}

/// Encodes an f32 image as 8-bit TIFF.
pub fn encode(image: &Image, compression: TiffCompression) -> IoResult<Vec<u8>> {
    use tiff::encoder::{colortype, TiffEncoder};

    let data = image.to_u8();
    let mut cursor = Cursor::new(Vec::new());
    let encoder =
        TiffEncoder::new(&mut cursor).map_err(|e| IoError::EncodeError(e.to_string()))?;
    let mut encoder = encoder.with_compression(compression.to_tiff());

    match image.channels() {
        3 => {
            let image_encoder = encoder
                .new_image::<colortype::RGB8>(image.width(), image.height())
                .map_err(|e| IoError::EncodeError(e.to_string()))?;
            image_encoder
                .write_data(&data)
                .map_err(|e| IoError::EncodeError(e.to_string()))?;
        }
        4 => {
            let image_encoder = encoder
                .new_image::<colortype::RGBA8>(image.width(), image.height())
                .map_err(|e| IoError::EncodeError(e.to_string()))?;
            image_encoder
                .write_data(&data)
                .map_err(|e| IoError::EncodeError(e.to_string()))?;
        }
        c => {
            return Err(IoError::EncodeError(format!(
                "unsupported channel count: {c}"
            )));
        }
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(w: u32, h: u32, channels: u8) -> Image {
        let mut img = Image::new(w, h, channels);
        for y in 0..h {
            for x in 0..w {
                let v = (x % 4) as f32 / 3.0;
                let px = [v, 0.5, 1.0 - v, 1.0];
                img.set_pixel(x, y, &px[..channels as usize]);
            }
        }
        img
    }

    #[test]
    fn test_round_trip_lzw() {
        let img = bars(20, 10, 3);
        let bytes = encode(&img, TiffCompression::Lzw).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (20, 10));
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn test_round_trip_uncompressed_rgba() {
        let img = bars(12, 12, 4);
        let bytes = encode(&img, TiffCompression::None).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.channels(), 4);
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn test_decode_dimensions() {
        let img = bars(7, 5, 3);
        let bytes = encode(&img, TiffCompression::Lzw).unwrap();
        assert_eq!(decode_dimensions(&bytes).unwrap(), (7, 5, 3));
    }
}
