//! Mode selection.
//!
//! A fixed, ordered rule list maps the request (dimensions, scale,
//! options) and the environment (backend availability, budgets) to a
//! processing [`Mode`]. First match wins, the decision is final, and the
//! matched rule plus every measured input is recorded for telemetry;
//! nothing downstream silently changes mode. The single exception is the
//! stage-boundary re-evaluation inside the progressive scaler, which may
//! hand the remainder of a plan to the CPU.

use tracing::debug;

use crate::backend::Backend;

/// Scale above which tiled processing is mandatory.
pub const TILED_SCALE_THRESHOLD: f64 = 4.1;

/// Output pixel count above which tiled processing is mandatory.
pub const TILED_OUTPUT_PIXELS: f64 = 50.0e6;

/// Maximum input pixel count for the face-enhance path.
pub const FACE_MAX_PIXELS: f64 = 50.0e6;

/// Maximum aspect ratio (strict) for the face-enhance path.
pub const FACE_MAX_ASPECT: f64 = 4.0;

/// Scale above which a GPU run goes multi-stage.
pub const PROGRESSIVE_SCALE_THRESHOLD: f64 = 4.0;

/// Minimum scale for which the GPU direct path is preferred.
pub const GPU_DIRECT_MIN_SCALE: f64 = 2.0;

/// Processing mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single-pass resampling on the given backend.
    Direct(Backend),
    /// Multi-stage plan on the GPU.
    Progressive,
    /// Overlap-tiled parallel processing.
    Tiled,
    /// GPU stages with a CPU remainder; entered from `Progressive` at a
    /// stage boundary, never chosen up front.
    HybridGpuThenCpu,
    /// External face restoration, then residual scaling.
    FaceEnhanceThenScale,
    /// A GPU mode downgraded to the CPU after `BackendUnavailable`.
    CpuFallback,
}

/// Measured inputs to a policy decision.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInputs {
    /// Source width.
    pub width: u32,
    /// Source height.
    pub height: u32,
    /// Channel count.
    pub channels: u8,
    /// Requested scale.
    pub scale: f64,
    /// Whether face enhancement is requested (explicitly or by default).
    pub face_enhance: bool,
    /// Whether face enhancement was explicitly requested by the caller
    /// (affects fallback on enhancement failure, not mode selection).
    pub face_enhance_mandated: bool,
    /// Force the CPU backend.
    pub force_cpu: bool,
    /// Force the GPU backend.
    pub force_gpu: bool,
}

/// Environment the decision runs against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEnv {
    /// Whether a GPU backend is present.
    pub gpu_available: bool,
    /// GPU memory budget in bytes.
    pub memory_budget_gpu: u64,
    /// Whether the face-enhance binary is configured and present.
    pub face_binary_available: bool,
}

/// The chosen mode with its numeric justification.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Chosen mode.
    pub mode: Mode,
    /// Name of the first matching rule.
    pub rule: &'static str,
    /// Input pixel count.
    pub input_pixels: u64,
    /// Projected output pixel count (`W * H * S^2`).
    pub output_pixels: f64,
    /// Projected output bytes at f32 working precision.
    pub estimated_output_bytes: u64,
    /// GPU budget the estimate was compared against.
    pub memory_budget_gpu: u64,
    /// Input aspect ratio, long side over short side.
    pub aspect_ratio: f64,
    /// Requested scale.
    pub scale: f64,
}

/// Selects the processing mode. Rules are evaluated in order; the first
/// match wins.
pub fn decide(inputs: &PolicyInputs, env: &PolicyEnv) -> PolicyDecision {
    let input_pixels = inputs.width as u64 * inputs.height as u64;
    let output_pixels = input_pixels as f64 * inputs.scale * inputs.scale;
    let estimated_output_bytes = (output_pixels * inputs.channels as f64 * 4.0) as u64;
    let aspect_ratio = {
        let long = inputs.width.max(inputs.height) as f64;
        let short = inputs.width.min(inputs.height) as f64;
        long / short
    };

    let (mode, rule) = if inputs.force_cpu {
        (Mode::Direct(Backend::Cpu), "force_cpu")
    } else if inputs.face_enhance
        && (input_pixels as f64) < FACE_MAX_PIXELS
        && aspect_ratio < FACE_MAX_ASPECT
        && env.face_binary_available
    {
        (Mode::FaceEnhanceThenScale, "face_enhance")
    } else if inputs.scale > TILED_SCALE_THRESHOLD
        || output_pixels > TILED_OUTPUT_PIXELS
        || estimated_output_bytes > env.memory_budget_gpu
    {
        (Mode::Tiled, "tiled")
    } else if inputs.scale > PROGRESSIVE_SCALE_THRESHOLD && env.gpu_available {
        (Mode::Progressive, "progressive")
    } else if inputs.scale >= GPU_DIRECT_MIN_SCALE
        && env.gpu_available
        && estimated_output_bytes <= env.memory_budget_gpu
    {
        (Mode::Direct(Backend::Wgpu), "direct_gpu")
    } else {
        (Mode::Direct(Backend::Cpu), "direct_cpu")
    };

    let decision = PolicyDecision {
        mode,
        rule,
        input_pixels,
        output_pixels,
        estimated_output_bytes,
        memory_budget_gpu: env.memory_budget_gpu,
        aspect_ratio,
        scale: inputs.scale,
    };

    debug!(
        rule = decision.rule,
        mode = ?decision.mode,
        input_pixels = decision.input_pixels,
        output_pixels = decision.output_pixels,
        estimated_output_bytes = decision.estimated_output_bytes,
        memory_budget_gpu = decision.memory_budget_gpu,
        aspect_ratio = decision.aspect_ratio,
        scale = decision.scale,
        "policy decision"
    );

    decision
}

/// Whether an automatic face-enhance request applies for this input:
/// at most 50 megapixels and aspect ratio strictly below 4.
pub fn face_enhance_default(width: u32, height: u32) -> bool {
    let pixels = width as u64 * height as u64;
    let long = width.max(height) as f64;
    let short = width.min(height) as f64;
    (pixels as f64) <= FACE_MAX_PIXELS && long / short < FACE_MAX_ASPECT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(width: u32, height: u32, scale: f64) -> PolicyInputs {
        PolicyInputs {
            width,
            height,
            channels: 3,
            scale,
            face_enhance: false,
            face_enhance_mandated: false,
            force_cpu: false,
            force_gpu: false,
        }
    }

    fn env_gpu(budget: u64) -> PolicyEnv {
        PolicyEnv {
            gpu_available: true,
            memory_budget_gpu: budget,
            face_binary_available: false,
        }
    }

    const BIG_BUDGET: u64 = 8 * 1024 * 1024 * 1024;

    #[test]
    fn test_force_cpu_wins() {
        let mut i = inputs(2000, 3000, 2.0);
        i.force_cpu = true;
        i.face_enhance = true;
        let d = decide(&i, &env_gpu(BIG_BUDGET));
        assert_eq!(d.mode, Mode::Direct(Backend::Cpu));
        assert_eq!(d.rule, "force_cpu");
    }

    #[test]
    fn test_face_enhance_when_available() {
        let mut i = inputs(800, 1200, 2.0);
        i.face_enhance = true;
        let mut env = env_gpu(BIG_BUDGET);
        env.face_binary_available = true;
        assert_eq!(decide(&i, &env).mode, Mode::FaceEnhanceThenScale);

        // Without the binary, the request falls through.
        env.face_binary_available = false;
        assert_ne!(decide(&i, &env).mode, Mode::FaceEnhanceThenScale);
    }

    #[test]
    fn test_aspect_ratio_exactly_4_excluded() {
        // 800x3200 is exactly 4.0; the face rule requires strictly less.
        let mut i = inputs(800, 3200, 2.0);
        i.face_enhance = true;
        let mut env = env_gpu(BIG_BUDGET);
        env.face_binary_available = true;
        assert_ne!(decide(&i, &env).mode, Mode::FaceEnhanceThenScale);

        let mut i = inputs(800, 3199, 2.0);
        i.face_enhance = true;
        assert_eq!(decide(&i, &env).mode, Mode::FaceEnhanceThenScale);
    }

    #[test]
    fn test_tiled_scale_boundary() {
        // Small image so only the scale term can trigger tiling.
        let env = env_gpu(BIG_BUDGET);
        let d = decide(&inputs(1000, 1000, 4.11), &env);
        assert_eq!(d.mode, Mode::Tiled);
        assert_eq!(d.rule, "tiled");

        // 4.0999 must NOT tile; with a GPU it goes progressive.
        let d = decide(&inputs(1000, 1000, 4.0999), &env);
        assert_eq!(d.mode, Mode::Progressive);
    }

    #[test]
    fn test_tiled_by_output_pixels() {
        // 2000x3000 at 8x = 384 MP output.
        let d = decide(&inputs(2000, 3000, 8.0), &env_gpu(BIG_BUDGET));
        assert_eq!(d.mode, Mode::Tiled);
    }

    #[test]
    fn test_tiled_by_budget() {
        // Output fits the pixel threshold but not a 2 MiB budget.
        let d = decide(&inputs(1000, 1000, 2.0), &env_gpu(2 * 1024 * 1024));
        assert_eq!(d.mode, Mode::Tiled);
    }

    #[test]
    fn test_direct_gpu_at_2x() {
        let d = decide(&inputs(2000, 3000, 2.0), &env_gpu(BIG_BUDGET));
        assert_eq!(d.mode, Mode::Direct(Backend::Wgpu));
        assert_eq!(d.rule, "direct_gpu");
    }

    #[test]
    fn test_direct_cpu_without_gpu() {
        let env = PolicyEnv {
            gpu_available: false,
            memory_budget_gpu: BIG_BUDGET,
            face_binary_available: false,
        };
        let d = decide(&inputs(2000, 3000, 2.0), &env);
        assert_eq!(d.mode, Mode::Direct(Backend::Cpu));
        assert_eq!(d.rule, "direct_cpu");
    }

    #[test]
    fn test_small_scale_is_direct_cpu() {
        let d = decide(&inputs(1000, 1000, 1.5), &env_gpu(BIG_BUDGET));
        assert_eq!(d.mode, Mode::Direct(Backend::Cpu));
    }

    #[test]
    fn test_face_enhance_default_conditions() {
        assert!(face_enhance_default(2000, 3000));
        assert!(!face_enhance_default(8000, 8000)); // 64 MP
        assert!(!face_enhance_default(800, 3200)); // aspect exactly 4
    }

    #[test]
    fn test_decision_records_justification() {
        let d = decide(&inputs(1000, 500, 3.0), &env_gpu(BIG_BUDGET));
        assert_eq!(d.input_pixels, 500_000);
        assert_eq!(d.output_pixels, 4_500_000.0);
        assert_eq!(d.estimated_output_bytes, 4_500_000 * 12);
        assert_eq!(d.aspect_ratio, 2.0);
    }
}
