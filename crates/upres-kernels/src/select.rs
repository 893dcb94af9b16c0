//! Algorithm selection by scale factor.

use std::fmt;
use std::str::FromStr;

use upres_core::Image;

use crate::{fractional, resample, Filter, KernelError, KernelResult};

/// A resampling algorithm, either a concrete kernel or the progressive
/// marker handled by the stage planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Plain bilinear interpolation.
    Bilinear,
    /// Bicubic with Catmull-Rom weights.
    Bicubic,
    /// Lanczos windowed sinc, a = 2.
    Lanczos2,
    /// Lanczos windowed sinc, a = 3.
    Lanczos3,
    /// Perceptually smoothed bilinear for sub-1.2x steps.
    Fractional1_1x,
    /// Edge-aware weighting for sub-1.8x steps.
    Fractional1_5x,
    /// Multi-stage composition; resolved by the planner, not a kernel.
    Progressive,
}

impl Algorithm {
    /// Selects the best algorithm for a scale factor.
    ///
    /// The ladder favors cheap fractional kernels near 1x and moves to
    /// wider-support kernels as the scale grows; beyond 8x a single kernel
    /// pass loses too much detail and the planner composes stages instead.
    pub fn for_scale(scale: f64) -> Algorithm {
        if scale <= 1.2 {
            Algorithm::Fractional1_1x
        } else if scale <= 1.8 {
            Algorithm::Fractional1_5x
        } else if scale <= 2.0 {
            Algorithm::Bilinear
        } else if scale <= 4.0 {
            Algorithm::Bicubic
        } else if scale <= 8.0 {
            Algorithm::Lanczos3
        } else {
            Algorithm::Progressive
        }
    }

    /// Returns the underlying separable filter, if this algorithm is one.
    pub fn filter(&self) -> Option<Filter> {
        match self {
            Algorithm::Bilinear => Some(Filter::Bilinear),
            Algorithm::Bicubic => Some(Filter::CatmullRom),
            Algorithm::Lanczos2 => Some(Filter::Lanczos2),
            Algorithm::Lanczos3 => Some(Filter::Lanczos3),
            _ => None,
        }
    }

    /// Support radius in source pixels, used for tile-overlap checks.
    /// The fractional kernels read at most two pixels right/down.
    pub fn support(&self) -> u32 {
        match self {
            Algorithm::Fractional1_1x => 1,
            Algorithm::Fractional1_5x => 2,
            Algorithm::Progressive => Filter::Lanczos3.support(),
            other => other.filter().map(|f| f.support()).unwrap_or(1),
        }
    }

    /// Runs this algorithm on `src`, producing a `dst_w` x `dst_h` image.
    ///
    /// # Errors
    ///
    /// [`Algorithm::Progressive`] is not itself a kernel; applying it
    /// returns [`KernelError::InvalidScale`].
    pub fn apply(&self, src: &Image, dst_w: u32, dst_h: u32) -> KernelResult<Image> {
        match self {
            Algorithm::Fractional1_1x => fractional::scale_1_1x(src, dst_w, dst_h),
            Algorithm::Fractional1_5x => fractional::scale_1_5x(src, dst_w, dst_h),
            Algorithm::Progressive => Err(KernelError::InvalidScale(
                "progressive composition must be expanded into stages".into(),
            )),
            other => {
                // Kernel variants always carry a filter.
                let filter = other.filter().expect("kernel algorithm has a filter");
                resample(src, dst_w, dst_h, filter)
            }
        }
    }

    /// Runs this algorithm into a caller-provided buffer of exactly
    /// `dst_w * dst_h * channels` floats.
    pub fn apply_into(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        out: &mut [f32],
    ) -> KernelResult<()> {
        match self {
            Algorithm::Fractional1_1x => fractional::scale_1_1x_into(src, dst_w, dst_h, out),
            Algorithm::Fractional1_5x => fractional::scale_1_5x_into(src, dst_w, dst_h, out),
            Algorithm::Progressive => Err(KernelError::InvalidScale(
                "progressive composition must be expanded into stages".into(),
            )),
            other => {
                let filter = other.filter().expect("kernel algorithm has a filter");
                crate::resample::resample_into(src, dst_w, dst_h, filter, out)
            }
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Bilinear => "bilinear",
            Algorithm::Bicubic => "bicubic",
            Algorithm::Lanczos2 => "lanczos2",
            Algorithm::Lanczos3 => "lanczos3",
            Algorithm::Fractional1_1x => "fractional-1.1x",
            Algorithm::Fractional1_5x => "fractional-1.5x",
            Algorithm::Progressive => "progressive",
        };
        f.write_str(name)
    }
}

impl FromStr for Algorithm {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bilinear" => Ok(Algorithm::Bilinear),
            "bicubic" => Ok(Algorithm::Bicubic),
            "lanczos2" => Ok(Algorithm::Lanczos2),
            "lanczos3" => Ok(Algorithm::Lanczos3),
            "fractional-1.1x" => Ok(Algorithm::Fractional1_1x),
            "fractional-1.5x" => Ok(Algorithm::Fractional1_5x),
            "progressive" => Ok(Algorithm::Progressive),
            other => Err(KernelError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_ladder() {
        assert_eq!(Algorithm::for_scale(1.0), Algorithm::Fractional1_1x);
        assert_eq!(Algorithm::for_scale(1.2), Algorithm::Fractional1_1x);
        assert_eq!(Algorithm::for_scale(1.5), Algorithm::Fractional1_5x);
        assert_eq!(Algorithm::for_scale(1.9), Algorithm::Bilinear);
        assert_eq!(Algorithm::for_scale(2.0), Algorithm::Bilinear);
        assert_eq!(Algorithm::for_scale(3.5), Algorithm::Bicubic);
        assert_eq!(Algorithm::for_scale(4.0), Algorithm::Bicubic);
        assert_eq!(Algorithm::for_scale(6.0), Algorithm::Lanczos3);
        assert_eq!(Algorithm::for_scale(8.0), Algorithm::Lanczos3);
        assert_eq!(Algorithm::for_scale(8.01), Algorithm::Progressive);
    }

    #[test]
    fn test_round_trip_names() {
        for alg in [
            Algorithm::Bilinear,
            Algorithm::Bicubic,
            Algorithm::Lanczos2,
            Algorithm::Lanczos3,
            Algorithm::Fractional1_1x,
            Algorithm::Fractional1_5x,
            Algorithm::Progressive,
        ] {
            assert_eq!(alg.to_string().parse::<Algorithm>().unwrap(), alg);
        }
        assert!("nearest".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_apply_dispatch() {
        let src = Image::new(16, 16, 3);
        let out = Algorithm::Bicubic.apply(&src, 32, 32).unwrap();
        assert_eq!(out.dimensions(), (32, 32));
        assert!(Algorithm::Progressive.apply(&src, 32, 32).is_err());
    }

    #[test]
    fn test_support_covers_overlap_check() {
        assert_eq!(Algorithm::Lanczos3.support(), 3);
        assert_eq!(Algorithm::Bicubic.support(), 2);
        assert_eq!(Algorithm::Fractional1_5x.support(), 2);
    }
}
