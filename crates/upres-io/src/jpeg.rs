//! JPEG decode and encode.
//!
//! Decoding goes through `jpeg-decoder`, encoding through `jpeg-encoder`.
//! JPEG carries no alpha; RGBA images are flattened to RGB on encode.

use upres_core::Image;

use crate::{IoError, IoResult};

/// Reads (width, height, channels) from the JPEG header.
pub fn decode_dimensions(bytes: &[u8]) -> IoResult<(u32, u32, u8)> {
    let mut decoder = jpeg_decoder::Decoder::new(bytes);
    decoder
        .read_info()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| IoError::DecodeError("missing JPEG header info".into()))?;
    // All supported layouts decode to RGB.
    Ok((u32::from(info.width), u32::from(info.height), 3))
}

/// Decodes JPEG bytes into an f32 image (always 3 channels).
pub fn decode(bytes: &[u8]) -> IoResult<Image> {
    let mut decoder = jpeg_decoder::Decoder::new(bytes);
    let pixels = decoder
        .decode()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| IoError::DecodeError("missing JPEG header info".into()))?;

    let width = u32::from(info.width);
    let height = u32::from(info.height);

    let rgb: Vec<f32> = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => {
            pixels.iter().map(|&b| f32::from(b) / 255.0).collect()
        }
        jpeg_decoder::PixelFormat::L8 => pixels
            .iter()
            .flat_map(|&g| {
                let v = f32::from(g) / 255.0;
                [v, v, v]
            })
            .collect(),
        jpeg_decoder::PixelFormat::L16 => pixels
            .chunks_exact(2)
            .flat_map(|pair| {
                let v = f32::from(u16::from_le_bytes([pair[0], pair[1]])) / 65535.0;
                [v, v, v]
            })
            .collect(),
        jpeg_decoder::PixelFormat::CMYK32 => {
            return Err(IoError::UnsupportedLayout("JPEG CMYK".into()));
        }
    };

    Image::from_data(width, height, 3, rgb).map_err(|e| IoError::DecodeError(e.to_string()))
}

/// Encodes an f32 image as JPEG at the given quality (1-100).
pub fn encode(image: &Image, quality: u8) -> IoResult<Vec<u8>> {
    use jpeg_encoder::{ColorType as JpegColorType, Encoder};

    let data = image.to_u8();
    // Strip alpha; JPEG has no transparency.
    let rgb: Vec<u8> = match image.channels() {
        3 => data,
        4 => data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        c => {
            return Err(IoError::EncodeError(format!(
                "unsupported channel count: {c}"
            )));
        }
    };

    let width = u16::try_from(image.width())
        .map_err(|_| IoError::EncodeError("width exceeds JPEG limit of 65535".into()))?;
    let height = u16::try_from(image.height())
        .map_err(|_| IoError::EncodeError("height exceeds JPEG limit of 65535".into()))?;

    let mut out = Vec::new();
    let encoder = Encoder::new(&mut out, quality.clamp(1, 100));
    encoder
        .encode(&rgb, width, height, JpegColorType::Rgb)
        .map_err(|e| IoError::EncodeError(e.to_string()))?;

    Ok(out)
}
