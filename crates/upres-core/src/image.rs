//! Image buffer type for the upscaling pipeline.
//!
//! [`Image`] is an owned, interleaved, row-major f32 buffer. Working
//! precision throughout the pipeline is 32-bit float per channel with
//! values in [0, 1]; conversion from and to interleaved 8-bit happens at
//! the codec boundary.
//!
//! # Memory Layout
//!
//! Pixels are stored row-major, top-to-bottom, channels interleaved:
//!
//! ```text
//! Memory: [R G B R G B R G B ...]  <- Row 0
//!         [R G B R G B R G B ...]  <- Row 1
//! ```
//!
//! # Ownership
//!
//! Pixel storage is exclusively owned by one holder at a time. There is no
//! internal sharing; cloning copies the buffer. Tiles and intermediates
//! move their buffers in and out of the memory manager's pools.

use crate::{Error, Rect, Result};

/// Owned interleaved f32 image buffer.
///
/// # Example
///
/// ```rust
/// use upres_core::Image;
///
/// let mut img = Image::new(64, 64, 3);
/// img.set_pixel(10, 10, &[1.0, 0.5, 0.25]);
/// assert_eq!(img.pixel(10, 10)[0], 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Vec<f32>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Image {
    /// Creates a new image filled with zeros.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is not 3 or 4. Use [`Image::from_data`] for a
    /// fallible constructor.
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        assert!(
            channels == 3 || channels == 4,
            "channel count must be 3 or 4, got {channels}"
        );
        let len = width as usize * height as usize * channels as usize;
        Self {
            data: vec![0.0; len],
            width,
            height,
            channels,
        }
    }

    /// Creates an image from existing f32 pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if dimensions are zero, the channel
    /// count is not 3 or 4, or the buffer length does not equal
    /// `width * height * channels`.
    pub fn from_data(width: u32, height: u32, channels: u8, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_input(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        if channels != 3 && channels != 4 {
            return Err(Error::invalid_input(format!(
                "channel count must be 3 or 4, got {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::invalid_input(format!(
                "pixel buffer length {} does not match {width}x{height}x{channels} = {expected}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Creates an image from interleaved 8-bit data, mapping 0..=255 to [0, 1].
    pub fn from_u8(width: u32, height: u32, channels: u8, bytes: &[u8]) -> Result<Self> {
        let data = bytes.iter().map(|&b| f32::from(b) / 255.0).collect();
        Self::from_data(width, height, channels, data)
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Channel count (3 or 4).
    #[inline]
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// (width, height) pair.
    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Total pixel count (width * height).
    #[inline]
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Size of the backing buffer in bytes.
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64 * 4
    }

    /// Borrow the raw pixel data.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutably borrow the raw pixel data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the image, returning the backing buffer.
    #[inline]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Borrow one row of pixels.
    #[inline]
    pub fn row(&self, y: u32) -> &[f32] {
        let stride = self.width as usize * self.channels as usize;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// Mutably borrow one row of pixels.
    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [f32] {
        let stride = self.width as usize * self.channels as usize;
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    /// Borrow the pixel at (x, y).
    ///
    /// # Panics
    ///
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let c = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * c;
        &self.data[idx..idx + c]
    }

    /// Writes the pixel at (x, y).
    ///
    /// # Panics
    ///
    /// Panics if (x, y) is out of bounds or `px` is shorter than the
    /// channel count.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, px: &[f32]) {
        let c = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * c;
        self.data[idx..idx + c].copy_from_slice(&px[..c]);
    }

    /// Samples one channel with clamp-to-edge addressing.
    ///
    /// Coordinates may be negative or past the far edge; they are clamped
    /// to the nearest valid pixel. This is the addressing mode resampling
    /// kernels use at image borders.
    #[inline]
    pub fn sample_clamped(&self, x: i64, y: i64, channel: usize) -> f32 {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[(cy * self.width as usize + cx) * self.channels as usize + channel]
    }

    /// Copies a rectangular region into a new image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InternalInvariantViolated`] if the region is empty
    /// or extends past the image bounds; extraction geometry is computed by
    /// the tiler and must already be clamped.
    pub fn extract(&self, region: Rect) -> Result<Image> {
        if region.is_empty()
            || region.right() > self.width
            || region.bottom() > self.height
        {
            return Err(Error::invariant(format!(
                "extraction region {}x{}+{}+{} outside {}x{} image",
                region.width, region.height, region.x, region.y, self.width, self.height
            )));
        }
        let c = self.channels as usize;
        let row_len = region.width as usize * c;
        let mut data = Vec::with_capacity(region.height as usize * row_len);
        for y in region.y..region.bottom() {
            let start = (y as usize * self.width as usize + region.x as usize) * c;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Image::from_data(region.width, region.height, self.channels, data)
    }

    /// Pastes `src` into this image with its top-left corner at (x, y).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InternalInvariantViolated`] if the paste would
    /// write outside the canvas or the channel counts differ.
    pub fn paste(&mut self, src: &Image, x: u32, y: u32) -> Result<()> {
        if src.channels != self.channels {
            return Err(Error::invariant(format!(
                "paste channel mismatch: {} vs {}",
                src.channels, self.channels
            )));
        }
        if x + src.width > self.width || y + src.height > self.height {
            return Err(Error::invariant(format!(
                "paste of {}x{} at ({x}, {y}) outside {}x{} canvas",
                src.width, src.height, self.width, self.height
            )));
        }
        let c = self.channels as usize;
        let src_stride = src.width as usize * c;
        for sy in 0..src.height as usize {
            let dst_start = ((y as usize + sy) * self.width as usize + x as usize) * c;
            let src_start = sy * src_stride;
            self.data[dst_start..dst_start + src_stride]
                .copy_from_slice(&src.data[src_start..src_start + src_stride]);
        }
        Ok(())
    }

    /// Crops `left`/`top`/`right`/`bottom` pixels off the edges, returning
    /// a new image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InternalInvariantViolated`] if the crop consumes
    /// the whole image in either dimension.
    pub fn crop_edges(&self, left: u32, top: u32, right: u32, bottom: u32) -> Result<Image> {
        if left + right >= self.width || top + bottom >= self.height {
            return Err(Error::invariant(format!(
                "crop ({left}, {top}, {right}, {bottom}) consumes entire {}x{} image",
                self.width, self.height
            )));
        }
        self.extract(Rect::new(
            left,
            top,
            self.width - left - right,
            self.height - top - bottom,
        ))
    }

    /// Converts to interleaved 8-bit, clamping each value to [0, 1].
    pub fn to_u8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_validates_length() {
        let ok = Image::from_data(2, 2, 3, vec![0.0; 12]);
        assert!(ok.is_ok());
        let bad = Image::from_data(2, 2, 3, vec![0.0; 11]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_from_data_rejects_bad_channels() {
        assert!(Image::from_data(2, 2, 5, vec![0.0; 20]).is_err());
        assert!(Image::from_data(0, 2, 3, vec![]).is_err());
    }

    #[test]
    fn test_u8_round_trip() {
        let bytes: Vec<u8> = vec![0, 128, 255, 64, 32, 200];
        let img = Image::from_u8(2, 1, 3, &bytes).unwrap();
        assert_eq!(img.to_u8(), bytes);
    }

    #[test]
    fn test_sample_clamped_edges() {
        let mut img = Image::new(4, 4, 3);
        img.set_pixel(0, 0, &[0.25, 0.0, 0.0]);
        img.set_pixel(3, 3, &[0.75, 0.0, 0.0]);
        assert_eq!(img.sample_clamped(-5, -5, 0), 0.25);
        assert_eq!(img.sample_clamped(10, 10, 0), 0.75);
    }

    #[test]
    fn test_extract_and_paste() {
        let mut img = Image::new(8, 8, 3);
        img.set_pixel(3, 2, &[1.0, 0.5, 0.25]);

        let tile = img.extract(Rect::new(2, 2, 4, 4)).unwrap();
        assert_eq!(tile.dimensions(), (4, 4));
        assert_eq!(tile.pixel(1, 0), &[1.0, 0.5, 0.25]);

        let mut canvas = Image::new(8, 8, 3);
        canvas.paste(&tile, 4, 4).unwrap();
        assert_eq!(canvas.pixel(5, 4), &[1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_extract_out_of_bounds_is_fatal() {
        let img = Image::new(4, 4, 3);
        assert!(img.extract(Rect::new(2, 2, 4, 4)).is_err());
    }

    #[test]
    fn test_paste_out_of_bounds_is_fatal() {
        let mut canvas = Image::new(4, 4, 3);
        let tile = Image::new(2, 2, 3);
        assert!(canvas.paste(&tile, 3, 3).is_err());
    }

    #[test]
    fn test_crop_edges() {
        let img = Image::new(10, 10, 3);
        let cropped = img.crop_edges(1, 2, 3, 4).unwrap();
        assert_eq!(cropped.dimensions(), (6, 4));
        assert!(img.crop_edges(5, 0, 5, 0).is_err());
    }
}
