//! CPU backend; kernel inner loops parallelize with rayon.

use upres_core::{Image, Result};
use upres_kernels::Algorithm;

use super::{Backend, ScaleBackend};
use crate::limits::DeviceLimits;

/// CPU resampling backend. Always available.
pub struct CpuBackend {
    limits: DeviceLimits,
}

impl CpuBackend {
    /// Creates a backend with host-probed limits.
    pub fn new() -> Self {
        Self {
            limits: DeviceLimits::detect_host(),
        }
    }

    /// Creates a backend with explicit limits, for budget overrides and
    /// tests.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self { limits }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn kind(&self) -> Backend {
        Backend::Cpu
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn concurrency_hint(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    fn resample(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
    ) -> Result<Image> {
        Ok(algorithm.apply(src, dst_w, dst_h)?)
    }

    fn resample_into(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
        out: &mut [f32],
    ) -> Result<()> {
        Ok(algorithm.apply_into(src, dst_w, dst_h, out)?)
    }
}
