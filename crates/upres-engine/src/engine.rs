//! Session orchestration: decode, decide, execute, encode.

use std::time::Instant;

use tracing::{info, warn};
use upres_core::{
    CancellationToken, Error, Image, ProgressEvent, ProgressSender, Result, Stage, StageStats,
};
use upres_kernels::Algorithm;

use crate::backend::{create_backend, Backend, ScaleBackend};
use crate::face;
use crate::grid::TileGrid;
use crate::limits::DeviceLimits;
use crate::options::{EngineConfig, ScaleRequest};
use crate::policy::{self, Mode, PolicyEnv, PolicyInputs};
use crate::pool::{MemoryManager, PoolHandle, ScaleBucket, UsageClass};
use crate::progressive::{scale_progressive, ScalingPlan};
use crate::tiler::{scale_tiled, TilerConfig};

/// The upscaling engine.
///
/// One instance serves many sessions; each [`run`](Self::run) call is an
/// independent session with its own memory manager and progress stream.
pub struct Upscaler {
    config: EngineConfig,
}

impl Upscaler {
    /// Creates an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Creates an engine with defaults (no face enhancement configured).
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Runs a session, emitting progress through `progress`.
    ///
    /// On success the stream ends with a `Complete` event at exactly 100
    /// percent; on failure with a single `Error` event carrying the error
    /// kind. No partial output is ever returned.
    pub fn run(
        &self,
        request: &ScaleRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let started = Instant::now();
        match self.run_inner(request, progress, cancel, started) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                progress.error(e.kind(), e.to_string());
                Err(e)
            }
        }
    }

    /// Convenience wrapper: runs on the current thread and returns the
    /// result together with the buffered progress events.
    pub fn upscale(&self, request: &ScaleRequest) -> (Result<Vec<u8>>, Vec<ProgressEvent>) {
        let (tx, rx) = upres_core::progress::channel();
        let cancel = CancellationToken::new();
        let result = self.run(request, &tx, &cancel);
        drop(tx);
        (result, rx.collect())
    }

    fn run_inner(
        &self,
        request: &ScaleRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Vec<u8>> {
        request.options.validate()?;
        if !request.scale.is_finite() || request.scale < 1.0 {
            return Err(Error::invalid_input(format!(
                "scale {} must be a finite value >= 1.0",
                request.scale
            )));
        }

        progress.emit(Stage::Initializing, 1.0, "decoding input");
        let meta = self.config.codec.decode_metadata(&request.input)?;
        let source = self.config.codec.decode_pixels(&request.input)?;
        let scale = request.scale;
        let final_w = (meta.width as f64 * scale).round() as u32;
        let final_h = (meta.height as f64 * scale).round() as u32;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Decide the mode.
        let opts = &request.options;
        let gpu_available = !opts.force_cpu && Backend::Wgpu.is_available();
        if opts.force_gpu && !gpu_available {
            return Err(Error::backend_unavailable("gpu (forced)"));
        }
        let gpu_budget = opts
            .memory_budget_gpu_bytes
            .unwrap_or_else(|| DeviceLimits::default().safe_limit);
        let inputs = PolicyInputs {
            width: meta.width,
            height: meta.height,
            channels: source.channels(),
            scale,
            face_enhance: opts
                .face_enhance
                .unwrap_or_else(|| policy::face_enhance_default(meta.width, meta.height)),
            face_enhance_mandated: opts.face_enhance_mandated(),
            force_cpu: opts.force_cpu,
            force_gpu: opts.force_gpu,
        };
        let env = PolicyEnv {
            gpu_available,
            memory_budget_gpu: gpu_budget,
            face_binary_available: self
                .config
                .face
                .as_ref()
                .map(|f| f.is_available())
                .unwrap_or(false),
        };
        let decision = policy::decide(&inputs, &env);
        progress.emit(
            Stage::Planning,
            5.0,
            format!("mode {:?} ({})", decision.mode, decision.rule),
        );

        // Resolve the execution backend; a GPU mode downgrades to the
        // CPU only here, and only when the GPU is not forced.
        let (mode, backend) = self.resolve_backend(decision.mode, opts.force_gpu)?;
        let cpu_backend = self.cpu_backend(opts.memory_budget_cpu_bytes);

        // Session memory manager, budgeted to the execution backend.
        let limits = self.session_limits(&*backend, opts);
        let manager = MemoryManager::spawn(limits, self.config.pool.clone());
        let pool = manager.handle();

        let algorithm = opts
            .algorithm
            .unwrap_or_else(|| Algorithm::for_scale(scale));

        let tiler_config = TilerConfig {
            concurrency: if opts.enable_parallel_processing {
                opts.parallel_concurrency
            } else {
                1
            },
            tile_deadline: self.config.tile_deadline,
        };
        let image = self.execute(
            mode,
            &source,
            scale,
            final_w,
            final_h,
            algorithm,
            opts.face_enhance_mandated(),
            &tiler_config,
            &*backend,
            &*cpu_backend,
            &pool,
            progress,
            cancel,
        )?;

        // Dimensional contract before any encode.
        if (image.width() as i64 - final_w as i64).abs() > 1
            || (image.height() as i64 - final_h as i64).abs() > 1
        {
            return Err(Error::invariant(format!(
                "output {}x{} drifts from expected {final_w}x{final_h}",
                image.width(),
                image.height()
            )));
        }

        progress.emit(Stage::Encoding, 95.0, "encoding output");
        let bytes = self.config.codec.encode(&image, &request.encoding)?;

        // Session teardown: everything must be back in the pool.
        let stats = pool.drain()?;
        if stats.accounting.in_use != 0 {
            warn!(
                in_use = stats.accounting.in_use,
                "buffers still in use at session end"
            );
            debug_assert_eq!(stats.accounting.in_use, 0);
        }

        info!(
            width = image.width(),
            height = image.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            peak_bytes = stats.accounting.peak,
            "session complete"
        );
        progress.complete_with_stats(
            format!("{}x{} ready", image.width(), image.height()),
            Some(StageStats {
                peak_memory_bytes: Some(stats.accounting.peak),
                elapsed_ms: Some(started.elapsed().as_millis() as u64),
                ..Default::default()
            }),
        );
        Ok(bytes)
    }

    /// Creates the execution backend for a mode, downgrading GPU modes to
    /// [`Mode::CpuFallback`] when the device cannot be initialized.
    fn resolve_backend(
        &self,
        mode: Mode,
        force_gpu: bool,
    ) -> Result<(Mode, Box<dyn ScaleBackend>)> {
        let wants_gpu = matches!(
            mode,
            Mode::Direct(Backend::Wgpu) | Mode::Progressive | Mode::HybridGpuThenCpu
        ) || (matches!(mode, Mode::Tiled) && Backend::Wgpu.is_available());

        if wants_gpu {
            match create_backend(Backend::Wgpu) {
                Ok(backend) => return Ok((mode, backend)),
                Err(e) if force_gpu => return Err(e),
                Err(e) => {
                    warn!(error = %e, "GPU unavailable, downgrading to CPU");
                    let fallback = match mode {
                        Mode::Tiled => Mode::Tiled,
                        _ => Mode::CpuFallback,
                    };
                    return Ok((fallback, create_backend(Backend::Cpu)?));
                }
            }
        }
        Ok((mode, create_backend(Backend::Cpu)?))
    }

    fn cpu_backend(&self, budget_override: Option<u64>) -> Box<dyn ScaleBackend> {
        match budget_override {
            Some(budget) => Box::new(crate::backend::CpuBackend::with_limits(
                DeviceLimits::with_budget(budget),
            )),
            None => Box::new(crate::backend::CpuBackend::new()),
        }
    }

    /// Session memory limits: caller overrides beat backend probes.
    fn session_limits(
        &self,
        backend: &dyn ScaleBackend,
        opts: &crate::options::ScaleOptions,
    ) -> DeviceLimits {
        let override_bytes = match backend.kind() {
            Backend::Cpu => opts.memory_budget_cpu_bytes,
            _ => opts.memory_budget_gpu_bytes,
        };
        match override_bytes {
            Some(bytes) => DeviceLimits::with_budget(bytes),
            None => backend.limits().clone(),
        }
    }

    /// Dispatches the chosen mode.
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        mode: Mode,
        source: &Image,
        scale: f64,
        final_w: u32,
        final_h: u32,
        algorithm: Algorithm,
        face_mandated: bool,
        tiler_config: &TilerConfig,
        backend: &dyn ScaleBackend,
        cpu: &dyn ScaleBackend,
        pool: &PoolHandle,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Image> {
        match mode {
            Mode::Direct(_) | Mode::CpuFallback => {
                if algorithm == Algorithm::Progressive {
                    let plan = ScalingPlan::build(scale)?;
                    let outcome = scale_progressive(
                        source.clone(),
                        &plan,
                        backend,
                        cpu,
                        pool,
                        &self.config.codec,
                        progress,
                        cancel,
                    )?;
                    return Ok(outcome.image);
                }
                self.direct(source, final_w, final_h, algorithm, backend, pool, progress, cancel)
            }
            Mode::Tiled => {
                let grid = TileGrid::new(source.width(), source.height(), scale)?;
                let tile_algorithm = match algorithm {
                    // A per-tile multi-stage composition is not worth its
                    // memory churn; the widest kernel covers large scales.
                    Algorithm::Progressive => Algorithm::Lanczos3,
                    a => a,
                };
                scale_tiled(
                    source,
                    &grid,
                    tile_algorithm,
                    backend,
                    pool,
                    progress,
                    cancel,
                    tiler_config,
                )
            }
            Mode::Progressive | Mode::HybridGpuThenCpu => {
                let plan = ScalingPlan::build(scale)?;
                let outcome = scale_progressive(
                    source.clone(),
                    &plan,
                    backend,
                    cpu,
                    pool,
                    &self.config.codec,
                    progress,
                    cancel,
                )?;
                if outcome.handed_off {
                    info!(
                        stages_on_primary = outcome.stages_completed,
                        "session finished as GPU-then-CPU hybrid"
                    );
                }
                Ok(outcome.image)
            }
            Mode::FaceEnhanceThenScale => self.face_enhance_then_scale(
                source,
                final_w,
                final_h,
                face_mandated,
                cpu,
                pool,
                progress,
                cancel,
            ),
        }
    }

    /// Single-pass resampling through a pooled output buffer.
    #[allow(clippy::too_many_arguments)]
    fn direct(
        &self,
        source: &Image,
        final_w: u32,
        final_h: u32,
        algorithm: Algorithm,
        backend: &dyn ScaleBackend,
        pool: &PoolHandle,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Image> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        progress.emit(
            Stage::Processing,
            20.0,
            format!("direct {algorithm} on {}", backend.name()),
        );

        let channels = source.channels();
        let mut buf = pool.acquire_image(
            UsageClass::Output,
            ScaleBucket::Generic,
            final_w,
            final_h,
            channels,
        )?;
        backend.resample_into(source, final_w, final_h, algorithm, buf.as_mut_slice())?;

        // The result leaves the pool's domain.
        let data = buf.detach();
        Image::from_data(final_w, final_h, channels, data)
    }

    /// Face restoration, then residual scaling with Lanczos-3.
    #[allow(clippy::too_many_arguments)]
    fn face_enhance_then_scale(
        &self,
        source: &Image,
        final_w: u32,
        final_h: u32,
        face_mandated: bool,
        cpu: &dyn ScaleBackend,
        pool: &PoolHandle,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Image> {
        let face_config = self
            .config
            .face
            .as_ref()
            .ok_or_else(|| Error::invariant("face mode chosen without a configured bridge"))?;

        progress.emit(Stage::Processing, 15.0, "running face restoration");
        match face::enhance(face_config, source, &self.config.codec, cancel) {
            Ok(outcome) if outcome.faces_found => {
                progress.emit(Stage::Processing, 60.0, "faces restored, residual scaling");
                let enhanced = outcome.image;
                if enhanced.dimensions() == (final_w, final_h) {
                    return Ok(enhanced);
                }
                self.direct(
                    &enhanced,
                    final_w,
                    final_h,
                    Algorithm::Lanczos3,
                    cpu,
                    pool,
                    progress,
                    cancel,
                )
            }
            Ok(_) => {
                // No faces: traditional scaling at the requested scale.
                progress.emit(
                    Stage::Processing,
                    40.0,
                    "no faces detected, falling back to lanczos3",
                );
                self.direct(
                    source,
                    final_w,
                    final_h,
                    Algorithm::Lanczos3,
                    cpu,
                    pool,
                    progress,
                    cancel,
                )
            }
            // Enhancement trouble only fails the session when the caller
            // demanded enhancement.
            Err(e) if e.is_enhance_fallback() && !face_mandated => {
                warn!(error = %e, "face restoration failed, falling back to lanczos3");
                self.direct(
                    source,
                    final_w,
                    final_h,
                    Algorithm::Lanczos3,
                    cpu,
                    pool,
                    progress,
                    cancel,
                )
            }
            Err(e) => Err(e),
        }
    }
}
