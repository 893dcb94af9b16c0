//! Neighborhood resampler shared by all separable filters.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use upres_core::Image;

use crate::{Filter, KernelError, KernelResult};

/// Resamples `src` to `dst_w` x `dst_h` with the given filter.
///
/// For each output pixel the source coordinate is
/// `center = (out + 0.5) * (src / dst) - 0.5`; the kernel's square
/// neighborhood around `floor(center)` is sampled with clamp-to-edge
/// addressing, weighted by `W(du) * W(dv)`, normalized by the weight sum,
/// and clamped to [0, 1]. When minifying, the kernel footprint widens by
/// the scale ratio so every covered source pixel contributes.
///
/// # Errors
///
/// Returns [`KernelError::InvalidDimensions`] if either target dimension
/// is zero.
pub fn resample(src: &Image, dst_w: u32, dst_h: u32, filter: Filter) -> KernelResult<Image> {
    let channels = src.channels() as usize;
    let mut data = vec![0.0f32; dst_w as usize * dst_h as usize * channels];
    resample_into(src, dst_w, dst_h, filter, &mut data)?;
    Image::from_data(dst_w, dst_h, src.channels(), data)
        .map_err(|e| KernelError::InvalidDimensions(e.to_string()))
}

/// Resamples `src` into a caller-provided buffer.
///
/// The buffer length must be exactly `dst_w * dst_h * channels`. This is
/// the entry point the engine uses with pooled buffers; [`resample`] is a
/// thin allocating wrapper around it.
pub fn resample_into(
    src: &Image,
    dst_w: u32,
    dst_h: u32,
    filter: Filter,
    out: &mut [f32],
) -> KernelResult<()> {
    if dst_w == 0 || dst_h == 0 {
        return Err(KernelError::InvalidDimensions(format!(
            "target size {dst_w}x{dst_h} must be positive"
        )));
    }
    let channels = src.channels() as usize;
    let row_len = dst_w as usize * channels;
    let expected = dst_h as usize * row_len;
    if out.len() != expected {
        return Err(KernelError::InvalidDimensions(format!(
            "output buffer length {} does not match {dst_w}x{dst_h}x{channels} = {expected}",
            out.len()
        )));
    }

    let scale_x = src.width() as f32 / dst_w as f32;
    let scale_y = src.height() as f32 / dst_h as f32;

    #[cfg(feature = "parallel")]
    let rows = out.par_chunks_mut(row_len);
    #[cfg(not(feature = "parallel"))]
    let rows = out.chunks_mut(row_len);

    rows.enumerate().for_each(|(y, row)| {
        resample_row(src, filter, scale_x, scale_y, dst_w, y as u32, row);
    });

    Ok(())
}

/// Fills one output row.
fn resample_row(
    src: &Image,
    filter: Filter,
    scale_x: f32,
    scale_y: f32,
    dst_w: u32,
    y: u32,
    row: &mut [f32],
) {
    let channels = src.channels() as usize;

    // Widen the footprint when minifying so the kernel integrates over
    // every covered source pixel.
    let fscale_x = scale_x.max(1.0);
    let fscale_y = scale_y.max(1.0);
    let radius_x = (filter.support() as f32 * fscale_x).ceil() as i64;
    let radius_y = (filter.support() as f32 * fscale_y).ceil() as i64;

    let center_v = (y as f32 + 0.5) * scale_y - 0.5;
    let y0 = center_v.floor() as i64;

    for x in 0..dst_w as i64 {
        let center_u = (x as f32 + 0.5) * scale_x - 0.5;
        let x0 = center_u.floor() as i64;

        let mut sum = [0.0f32; 4];
        let mut weight_sum = 0.0f32;

        for sy in (y0 - radius_y + 1)..=(y0 + radius_y) {
            let wy = filter.weight((center_v - sy as f32) / fscale_y);
            if wy == 0.0 {
                continue;
            }
            for sx in (x0 - radius_x + 1)..=(x0 + radius_x) {
                let w = wy * filter.weight((center_u - sx as f32) / fscale_x);
                if w == 0.0 {
                    continue;
                }
                weight_sum += w;
                for c in 0..channels {
                    sum[c] += src.sample_clamped(sx, sy, c) * w;
                }
            }
        }

        let out = &mut row[x as usize * channels..(x as usize + 1) * channels];
        if weight_sum > 0.0 {
            for c in 0..channels {
                out[c] = (sum[c] / weight_sum).clamp(0.0, 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: u32, h: u32) -> Image {
        let mut img = Image::new(w, h, 3);
        for y in 0..h {
            for x in 0..w {
                let v = x as f32 / (w - 1) as f32;
                img.set_pixel(x, y, &[v, v * 0.5, 1.0 - v]);
            }
        }
        img
    }

    #[test]
    fn test_identity_size_preserves_pixels() {
        let src = gradient_image(16, 16);
        for filter in [
            Filter::Bilinear,
            Filter::CatmullRom,
            Filter::Lanczos2,
            Filter::Lanczos3,
        ] {
            let dst = resample(&src, 16, 16, filter).unwrap();
            for (a, b) in src.data().iter().zip(dst.data()) {
                assert!(
                    (a - b).abs() < 1e-4,
                    "{filter:?} identity drifted: {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_constant_image_stays_constant() {
        let mut src = Image::new(8, 8, 4);
        src.data_mut().fill(0.5);
        let dst = resample(&src, 23, 17, Filter::Lanczos3).unwrap();
        for &v in dst.data() {
            assert!((v - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_constant_survives_downscale() {
        let mut src = Image::new(64, 64, 3);
        src.data_mut().fill(0.75);
        let dst = resample(&src, 16, 16, Filter::Lanczos3).unwrap();
        assert_eq!(dst.dimensions(), (16, 16));
        for &v in dst.data() {
            assert!((v - 0.75).abs() < 1e-4);
        }
    }

    #[test]
    fn test_output_dimensions() {
        let src = gradient_image(10, 20);
        let dst = resample(&src, 25, 50, Filter::CatmullRom).unwrap();
        assert_eq!(dst.dimensions(), (25, 50));
        assert_eq!(dst.channels(), 3);
    }

    #[test]
    fn test_output_clamped() {
        // Catmull-Rom overshoots on hard edges; output must stay in [0, 1].
        let mut src = Image::new(8, 8, 3);
        for y in 0..8 {
            for x in 0..8 {
                let v = if x < 4 { 0.0 } else { 1.0 };
                src.set_pixel(x, y, &[v, v, v]);
            }
        }
        let dst = resample(&src, 32, 32, Filter::CatmullRom).unwrap();
        for &v in dst.data() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_into_buffer_length_checked() {
        let src = gradient_image(8, 8);
        let mut short = vec![0.0f32; 10];
        assert!(resample_into(&src, 16, 16, Filter::Bilinear, &mut short).is_err());
    }

    #[test]
    fn test_zero_target_rejected() {
        let src = gradient_image(8, 8);
        assert!(resample(&src, 0, 8, Filter::Bilinear).is_err());
        assert!(resample(&src, 8, 0, Filter::Bilinear).is_err());
    }
}
