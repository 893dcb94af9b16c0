//! Compute backends for resampling.
//!
//! Provides a CPU backend (always available) and a wgpu backend behind
//! the `wgpu` feature, with detection and priority-based auto-selection.
//! Fallback is never implicit: the policy engine decides which backend a
//! session runs on, and a missing backend surfaces as
//! `BackendUnavailable`.

mod cpu;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use cpu::CpuBackend;

#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuBackend;

use upres_core::{Error, Image, Result};
use upres_kernels::Algorithm;

use crate::limits::DeviceLimits;

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (GPU over CPU).
    #[default]
    Auto,
    /// CPU backend; kernels parallelized with rayon.
    Cpu,
    /// wgpu backend (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Check if this backend is available on the current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto | Self::Cpu => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuBackend::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
        }
    }
}

/// Trait implemented by resampling backends.
pub trait ScaleBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Which [`Backend`] this is.
    fn kind(&self) -> Backend;

    /// Memory limits for budget decisions.
    fn limits(&self) -> &DeviceLimits;

    /// Suggested worker count for tiled dispatch.
    fn concurrency_hint(&self) -> usize;

    /// Resamples `src` to the target size with the given algorithm.
    fn resample(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
    ) -> Result<Image>;

    /// Resamples into a caller-provided buffer of exactly
    /// `dst_w * dst_h * channels` floats.
    fn resample_into(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
        out: &mut [f32],
    ) -> Result<()>;
}

/// Information about a compute backend.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Backend type.
    pub backend: Backend,
    /// Human-readable name.
    pub name: &'static str,
    /// Whether the backend is available.
    pub available: bool,
    /// Priority for auto-selection (higher = preferred).
    pub priority: u32,
    /// Description.
    pub description: &'static str,
}

/// Detect all compiled-in backends.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut backends = vec![BackendInfo {
        backend: Backend::Cpu,
        name: "CPU",
        available: true,
        priority: 10,
        description: "CPU with rayon parallelization",
    }];

    #[cfg(feature = "wgpu")]
    {
        let available = WgpuBackend::is_available();
        backends.push(BackendInfo {
            backend: Backend::Wgpu,
            name: "wgpu",
            available,
            priority: if available { 100 } else { 0 },
            description: "GPU via wgpu (Vulkan/Metal/DX12)",
        });
    }

    backends.sort_by(|a, b| b.priority.cmp(&a.priority));
    backends
}

/// Select the best available backend.
pub fn select_best_backend() -> Backend {
    detect_backends()
        .into_iter()
        .filter(|b| b.available)
        .max_by_key(|b| b.priority)
        .map(|b| b.backend)
        .unwrap_or(Backend::Cpu)
}

/// One-line-per-backend availability listing.
pub fn describe_backends() -> String {
    let mut desc = String::new();
    for info in detect_backends() {
        let status = if info.available { "+" } else { "-" };
        desc.push_str(&format!("[{}] {}: {}\n", status, info.name, info.description));
    }
    desc
}

/// Create a backend instance.
///
/// # Errors
///
/// Returns [`Error::BackendUnavailable`] when the requested backend is
/// not present or not compiled in.
pub fn create_backend(backend: Backend) -> Result<Box<dyn ScaleBackend>> {
    match backend {
        Backend::Auto => create_backend(select_best_backend()),
        Backend::Cpu => Ok(Box::new(CpuBackend::new())),
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                WgpuBackend::new().map(|b| Box::new(b) as Box<dyn ScaleBackend>)
            }
            #[cfg(not(feature = "wgpu"))]
            {
                Err(Error::backend_unavailable("wgpu (feature not enabled)"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_available() {
        assert!(Backend::Cpu.is_available());
        assert!(detect_backends().iter().any(|b| b.backend == Backend::Cpu));
    }

    #[test]
    fn test_best_backend_never_fails() {
        let backend = select_best_backend();
        assert!(backend.is_available());
        assert!(create_backend(backend).is_ok());
    }

    #[test]
    fn test_describe_lists_cpu() {
        assert!(describe_backends().contains("CPU"));
    }
}
