//! Fractional-step kernels for sub-2x scale stages.
//!
//! These two kernels cover the 1.1x and 1.5x steps of progressive plans
//! and small direct scales. Both are bilinear blends with reshaped
//! fractional weights:
//!
//! - [`scale_1_1x`] passes the fractional offsets through a cubic
//!   smoothstep, which suppresses the slight ringing plain bilinear shows
//!   on near-identity scales.
//! - [`scale_1_5x`] additionally inspects the local gradient and switches
//!   to a quintic smoothstep across edges, retaining more detail than
//!   plain bilinear at minimal cost.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use upres_core::Image;

use crate::{KernelError, KernelResult};

/// Gradient magnitude above which the 1.5x kernel treats a neighborhood
/// as an edge.
pub const EDGE_GRADIENT_THRESHOLD: f32 = 0.15;

/// Cubic smoothstep: `3t^2 - 2t^3`.
#[inline]
fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// Quintic smoothstep: `6t^5 - 15t^4 + 10t^3`. Flatter at the endpoints
/// than the cubic, which keeps edge transitions tighter.
#[inline]
fn smootherstep(t: f32) -> f32 {
    t * t * t * (t * (6.0 * t - 15.0) + 10.0)
}

/// Scales `src` with bilinear interpolation and perceptually smoothed
/// fractional weights. Intended for steps up to ~1.2x.
pub fn scale_1_1x(src: &Image, dst_w: u32, dst_h: u32) -> KernelResult<Image> {
    allocate_and_run(src, dst_w, dst_h, scale_1_1x_into)
}

/// [`scale_1_1x`] into a caller-provided buffer.
pub fn scale_1_1x_into(
    src: &Image,
    dst_w: u32,
    dst_h: u32,
    out: &mut [f32],
) -> KernelResult<()> {
    run(src, dst_w, dst_h, out, |src, x0, y0, fx, fy, px| {
        let fx = smoothstep(fx);
        let fy = smoothstep(fy);
        blend_2x2(src, x0, y0, fx, fy, px);
    })
}

/// Scales `src` with edge-aware fractional weighting. Intended for steps
/// up to ~1.8x.
///
/// Samples the 2x2 neighborhood plus one pixel right and one pixel down;
/// where the local gradient magnitude exceeds
/// [`EDGE_GRADIENT_THRESHOLD`] the fractional weights use the quintic
/// smoothstep, elsewhere the cubic one.
pub fn scale_1_5x(src: &Image, dst_w: u32, dst_h: u32) -> KernelResult<Image> {
    allocate_and_run(src, dst_w, dst_h, scale_1_5x_into)
}

/// [`scale_1_5x`] into a caller-provided buffer.
pub fn scale_1_5x_into(
    src: &Image,
    dst_w: u32,
    dst_h: u32,
    out: &mut [f32],
) -> KernelResult<()> {
    run(src, dst_w, dst_h, out, |src, x0, y0, fx, fy, px| {
        let g = gradient_magnitude(src, x0, y0);
        let (fx, fy) = if g > EDGE_GRADIENT_THRESHOLD {
            (smootherstep(fx), smootherstep(fy))
        } else {
            (smoothstep(fx), smoothstep(fy))
        };
        blend_2x2(src, x0, y0, fx, fy, px);
    })
}

/// Allocating wrapper shared by both kernels.
fn allocate_and_run(
    src: &Image,
    dst_w: u32,
    dst_h: u32,
    body: fn(&Image, u32, u32, &mut [f32]) -> KernelResult<()>,
) -> KernelResult<Image> {
    let channels = src.channels() as usize;
    let mut data = vec![0.0f32; dst_w as usize * dst_h as usize * channels];
    body(src, dst_w, dst_h, &mut data)?;
    Image::from_data(dst_w, dst_h, src.channels(), data)
        .map_err(|e| KernelError::InvalidDimensions(e.to_string()))
}

/// Mean absolute luminance gradient over the 2x2 block and its right/down
/// extension.
fn gradient_magnitude(src: &Image, x0: i64, y0: i64) -> f32 {
    let luma = |x: i64, y: i64| -> f32 {
        let mut acc = 0.0;
        for c in 0..3 {
            acc += src.sample_clamped(x, y, c);
        }
        acc / 3.0
    };
    let v00 = luma(x0, y0);
    let v10 = luma(x0 + 1, y0);
    let v01 = luma(x0, y0 + 1);
    let v20 = luma(x0 + 2, y0);
    let v02 = luma(x0, y0 + 2);
    ((v10 - v00).abs() + (v01 - v00).abs() + (v20 - v10).abs() + (v02 - v01).abs()) / 4.0
}

/// Bilinear blend of the clamped 2x2 neighborhood with pre-shaped
/// fractional weights.
#[inline]
fn blend_2x2(src: &Image, x0: i64, y0: i64, fx: f32, fy: f32, out: &mut [f32]) {
    let channels = src.channels() as usize;
    for c in 0..channels {
        let v00 = src.sample_clamped(x0, y0, c);
        let v10 = src.sample_clamped(x0 + 1, y0, c);
        let v01 = src.sample_clamped(x0, y0 + 1, c);
        let v11 = src.sample_clamped(x0 + 1, y0 + 1, c);
        let top = v00 * (1.0 - fx) + v10 * fx;
        let bottom = v01 * (1.0 - fx) + v11 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).clamp(0.0, 1.0);
    }
}

/// Shared driver: maps output pixels to source coordinates and hands the
/// integer/fractional split to `body`.
fn run<F>(src: &Image, dst_w: u32, dst_h: u32, out: &mut [f32], body: F) -> KernelResult<()>
where
    F: Fn(&Image, i64, i64, f32, f32, &mut [f32]) + Sync,
{
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
        let center_v = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = center_v.floor() as i64;
        let fy = center_v - y0 as f32;
        for x in 0..dst_w as usize {
            let center_u = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = center_u.floor() as i64;
            let fx = center_u - x0 as f32;
            body(
                src,
                x0,
                y0,
                fx,
                fy,
                &mut row[x * channels..(x + 1) * channels],
            );
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_smoothstep_endpoints() {
        assert_relative_eq!(smoothstep(0.0), 0.0);
        assert_relative_eq!(smoothstep(1.0), 1.0);
        assert_relative_eq!(smoothstep(0.5), 0.5);
        assert_relative_eq!(smootherstep(0.0), 0.0);
        assert_relative_eq!(smootherstep(1.0), 1.0);
        assert_relative_eq!(smootherstep(0.5), 0.5);
    }

    #[test]
    fn test_identity_passthrough() {
        // At 1:1 the fractional offsets are exactly zero, so both kernels
        // reproduce the input bit-for-bit.
        let mut src = Image::new(8, 8, 3);
        for y in 0..8 {
            for x in 0..8 {
                src.set_pixel(x, y, &[x as f32 / 7.0, y as f32 / 7.0, 0.5]);
            }
        }
        let a = scale_1_1x(&src, 8, 8).unwrap();
        let b = scale_1_5x(&src, 8, 8).unwrap();
        assert_eq!(a.data(), src.data());
        assert_eq!(b.data(), src.data());
    }

    #[test]
    fn test_constant_preserved() {
        let mut src = Image::new(10, 10, 4);
        src.data_mut().fill(0.25);
        let out = scale_1_5x(&src, 15, 15).unwrap();
        for &v in out.data() {
            assert!((v - 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn test_dimensions_1_1x() {
        let src = Image::new(100, 50, 3);
        let out = scale_1_1x(&src, 110, 55).unwrap();
        assert_eq!(out.dimensions(), (110, 55));
    }

    #[test]
    fn test_gradient_flat_vs_edge() {
        let mut flat = Image::new(4, 4, 3);
        flat.data_mut().fill(0.5);
        assert!(gradient_magnitude(&flat, 1, 1) < 1e-6);

        let mut edge = Image::new(4, 4, 3);
        for y in 0..4 {
            for x in 0..4 {
                let v = if x < 2 { 0.0 } else { 1.0 };
                edge.set_pixel(x, y, &[v, v, v]);
            }
        }
        assert!(gradient_magnitude(&edge, 1, 1) > EDGE_GRADIENT_THRESHOLD);
    }
}
