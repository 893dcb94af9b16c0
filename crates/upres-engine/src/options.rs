//! Request and engine configuration types.

use std::time::Duration;

use upres_core::{Error, Result};
use upres_io::{CodecAdapter, OutputEncoding};
use upres_kernels::Algorithm;

use crate::face::FaceEnhanceConfig;
use crate::pool::PoolConfig;
use crate::tiler::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ScaleOptions {
    /// Kernel override; `None` selects by scale.
    pub algorithm: Option<Algorithm>,
    /// Worker count for tiled processing (1-16).
    pub parallel_concurrency: usize,
    /// Whether tiled processing may use more than one worker.
    pub enable_parallel_processing: bool,
    /// Force the CPU backend.
    pub force_cpu: bool,
    /// Force the GPU backend; fail rather than downgrade.
    pub force_gpu: bool,
    /// Face enhancement: `None` = automatic (on for inputs up to 50 MP
    /// with aspect ratio under 4), `Some(v)` = caller decision.
    pub face_enhance: Option<bool>,
    /// GPU memory budget override in bytes.
    pub memory_budget_gpu_bytes: Option<u64>,
    /// CPU memory budget override in bytes.
    pub memory_budget_cpu_bytes: Option<u64>,
}

impl Default for ScaleOptions {
    fn default() -> Self {
        Self {
            algorithm: None,
            parallel_concurrency: DEFAULT_CONCURRENCY,
            enable_parallel_processing: true,
            force_cpu: false,
            force_gpu: false,
            face_enhance: None,
            memory_budget_gpu_bytes: None,
            memory_budget_cpu_bytes: None,
        }
    }
}

impl ScaleOptions {
    /// Validates option combinations.
    pub fn validate(&self) -> Result<()> {
        if self.force_cpu && self.force_gpu {
            return Err(Error::invalid_input(
                "force_cpu and force_gpu are mutually exclusive",
            ));
        }
        if self.parallel_concurrency == 0 || self.parallel_concurrency > MAX_CONCURRENCY {
            return Err(Error::invalid_input(format!(
                "parallel_concurrency {} outside 1..={MAX_CONCURRENCY}",
                self.parallel_concurrency
            )));
        }
        Ok(())
    }

    /// Whether the caller explicitly demanded face enhancement.
    pub fn face_enhance_mandated(&self) -> bool {
        self.face_enhance == Some(true)
    }
}

/// A scaling request: source bytes in, encoded bytes out.
#[derive(Debug, Clone)]
pub struct ScaleRequest {
    /// Encoded source image.
    pub input: Vec<u8>,
    /// Target scale factor, `>= 1.0`.
    pub scale: f64,
    /// Output encoding.
    pub encoding: OutputEncoding,
    /// Options.
    pub options: ScaleOptions,
}

impl ScaleRequest {
    /// Creates a request with default options and PNG output.
    pub fn new(input: Vec<u8>, scale: f64) -> Self {
        Self {
            input,
            scale,
            encoding: OutputEncoding::png(),
            options: ScaleOptions::default(),
        }
    }
}

/// Engine-level configuration shared across sessions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Codec adapter handle.
    pub codec: CodecAdapter,
    /// External face-restoration program, if installed.
    pub face: Option<FaceEnhanceConfig>,
    /// Pool tunables.
    pub pool: PoolConfig,
    /// Per-tile processing deadline.
    pub tile_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codec: CodecAdapter::new(),
            face: None,
            pool: PoolConfig::default(),
            tile_deadline: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_valid() {
        assert!(ScaleOptions::default().validate().is_ok());
    }

    #[test]
    fn test_forced_backends_exclusive() {
        let opts = ScaleOptions {
            force_cpu: true,
            force_gpu: true,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut opts = ScaleOptions::default();
        opts.parallel_concurrency = 0;
        assert!(opts.validate().is_err());
        opts.parallel_concurrency = 17;
        assert!(opts.validate().is_err());
        opts.parallel_concurrency = 16;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_mandated_flag() {
        let mut opts = ScaleOptions::default();
        assert!(!opts.face_enhance_mandated());
        opts.face_enhance = Some(true);
        assert!(opts.face_enhance_mandated());
        opts.face_enhance = Some(false);
        assert!(!opts.face_enhance_mandated());
    }
}
