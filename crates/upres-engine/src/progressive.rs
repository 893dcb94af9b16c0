//! Multi-stage progressive scaling.
//!
//! Large scale factors are decomposed into a plan of 2.0x / 1.5x / 1.1x
//! steps plus an optional residual; each stage runs a cheap kernel suited
//! to its small step. Between stages the intermediate is held as
//! fastest-compression PNG and the pixel buffers are released, keeping
//! the working set to one stage at a time.
//!
//! When a projected stage no longer fits the memory budget the remaining
//! scale is handed off to the CPU as a single Lanczos-3 pass (the
//! GPU-then-CPU hybrid).

use tracing::{debug, info, warn};
use upres_core::{CancellationToken, Error, Image, ProgressSender, Result, Stage, StageStats};
use upres_io::{CodecAdapter, OutputEncoding};
use upres_kernels::Algorithm;

use crate::backend::ScaleBackend;
use crate::pool::{PoolHandle, ScaleBucket, UsageClass};

/// Permitted drift between the stage product and the target scale,
/// relative to the target.
pub const PLAN_TOLERANCE: f64 = 0.01;

/// Permitted drift of the hybrid handoff, in output pixels per axis.
pub const HANDOFF_TOLERANCE_PX: f64 = 0.5;

/// One stage of a scaling plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanStage {
    /// Multiplicative scale of this stage.
    pub step_scale: f64,
    /// Kernel for this stage.
    pub algorithm: Algorithm,
}

/// An ordered sequence of scale stages whose product is the target scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPlan {
    /// Stages in execution order.
    pub stages: Vec<PlanStage>,
    /// The requested total scale.
    pub target_scale: f64,
}

impl ScalingPlan {
    /// Builds a plan for `scale`.
    ///
    /// Up to 3.0x a single stage suffices. Beyond that, the largest step
    /// from {2.0, 1.5, 1.1} not exceeding the remaining ratio is chosen
    /// repeatedly; a final residual stage covers what is left when no
    /// step fits.
    pub fn build(scale: f64) -> Result<Self> {
        if scale < 1.0 {
            return Err(Error::invalid_input(format!(
                "scale {scale} must be >= 1.0"
            )));
        }

        let mut stages = Vec::new();
        if scale <= 3.0 {
            stages.push(PlanStage {
                step_scale: scale,
                algorithm: Algorithm::for_scale(scale),
            });
        } else {
            let mut remaining = scale;
            while remaining >= 1.1 {
                let step = if remaining >= 2.0 {
                    2.0
                } else if remaining >= 1.5 {
                    1.5
                } else {
                    1.1
                };
                stages.push(PlanStage {
                    step_scale: step,
                    algorithm: Algorithm::for_scale(step),
                });
                remaining /= step;
            }
            if remaining > 1.0 + f64::EPSILON {
                stages.push(PlanStage {
                    step_scale: remaining,
                    algorithm: Algorithm::for_scale(remaining),
                });
            }
        }

        let plan = Self {
            stages,
            target_scale: scale,
        };
        plan.verify_product()?;
        Ok(plan)
    }

    /// Checks the stage product against the target within
    /// [`PLAN_TOLERANCE`].
    pub fn verify_product(&self) -> Result<()> {
        let product: f64 = self.stages.iter().map(|s| s.step_scale).product();
        if (product - self.target_scale).abs() > PLAN_TOLERANCE * self.target_scale {
            return Err(Error::invariant(format!(
                "stage product {product} drifts from target scale {}",
                self.target_scale
            )));
        }
        Ok(())
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the plan is empty (scale exactly 1.0 may produce one
    /// identity stage, never zero).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Result of a progressive run.
pub struct ProgressiveOutcome {
    /// The scaled image.
    pub image: Image,
    /// Whether the run switched to the CPU for its remainder.
    pub handed_off: bool,
    /// Stages completed on the primary backend.
    pub stages_completed: u32,
}

/// Executes `plan` over `source`.
///
/// `primary` runs the stages; `cpu` takes over if a projected stage
/// exceeds the budget (at most once; a second budget failure surfaces).
#[allow(clippy::too_many_arguments)]
pub fn scale_progressive(
    source: Image,
    plan: &ScalingPlan,
    primary: &dyn ScaleBackend,
    cpu: &dyn ScaleBackend,
    pool: &PoolHandle,
    codec: &CodecAdapter,
    progress: &ProgressSender,
    cancel: &CancellationToken,
) -> Result<ProgressiveOutcome> {
    let channels = source.channels();
    let final_w = (source.width() as f64 * plan.target_scale).round() as u32;
    let final_h = (source.height() as f64 * plan.target_scale).round() as u32;
    let total_stages = plan.len() as u32;

    info!(
        stages = total_stages,
        target_scale = plan.target_scale,
        backend = primary.name(),
        "progressive scaling"
    );

    let mut current: Option<Image> = Some(source);
    let mut held_png: Option<Vec<u8>> = None;
    let mut cumulative = 1.0f64;
    let mut stages_completed = 0u32;

    for (i, stage) in plan.stages.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Re-inflate the intermediate held as PNG between stages.
        let input: Image = match held_png.take() {
            Some(png) => codec.decode_pixels(&png)?,
            None => current
                .take()
                .ok_or_else(|| Error::invariant("progressive stage input missing"))?,
        };

        let is_last = i + 1 == plan.stages.len();
        let (dst_w, dst_h) = if is_last {
            (final_w, final_h)
        } else {
            (
                (input.width() as f64 * stage.step_scale).round() as u32,
                (input.height() as f64 * stage.step_scale).round() as u32,
            )
        };

        // Stage-boundary budget re-evaluation.
        let projected = input.byte_size() + dst_w as u64 * dst_h as u64 * channels as u64 * 4;
        let stats = pool.snapshot()?;
        if stats.accounting.allocated + projected > stats.safe_limit {
            warn!(
                stage = i,
                projected,
                limit = stats.safe_limit,
                "projected stage over budget, handing remaining scale to CPU"
            );
            let image = handoff_to_cpu(
                input, cumulative, plan.target_scale, final_w, final_h, cpu, progress,
            )?;
            return Ok(ProgressiveOutcome {
                image,
                handed_off: true,
                stages_completed,
            });
        }

        let percent = 10.0 + 78.0 * (i as f32 + 1.0) / total_stages as f32;
        progress.emit_with_stats(
            Stage::Processing,
            percent,
            format!(
                "stage {}/{}: {:.2}x {}",
                i + 1,
                total_stages,
                stage.step_scale,
                stage.algorithm
            ),
            Some(StageStats {
                stage_index: Some(i as u32),
                stages_total: Some(total_stages),
                peak_memory_bytes: Some(stats.accounting.peak),
                ..Default::default()
            }),
        );

        // Run the stage through a pooled buffer; hand off to the CPU if
        // the acquire itself is over budget. A second budget failure
        // inside the handoff surfaces to the caller.
        let mut buf = match pool.acquire_image(
            UsageClass::Compute,
            ScaleBucket::for_step(stage.step_scale),
            dst_w,
            dst_h,
            channels,
        ) {
            Ok(buf) => buf,
            Err(e) if e.is_out_of_budget() => {
                warn!(stage = i, "stage allocation over budget, handing off to CPU");
                let image = handoff_to_cpu(
                    input, cumulative, plan.target_scale, final_w, final_h, cpu, progress,
                )?;
                return Ok(ProgressiveOutcome {
                    image,
                    handed_off: true,
                    stages_completed,
                });
            }
            Err(e) => return Err(e),
        };

        primary.resample_into(&input, dst_w, dst_h, stage.algorithm, buf.as_mut_slice())?;
        let (out_img, ticket) = buf.into_image(dst_w, dst_h, channels)?;
        drop(input);
        cumulative *= stage.step_scale;
        stages_completed += 1;

        if is_last {
            // Final stage: the storage leaves the pool with the result.
            let data = out_img.into_data();
            drop(ticket);
            let image = Image::from_data(dst_w, dst_h, channels, data)?;
            debug!(width = dst_w, height = dst_h, "progressive plan complete");
            return Ok(ProgressiveOutcome {
                image,
                handed_off: false,
                stages_completed,
            });
        }

        // Hold the intermediate as fastest-compression PNG and release
        // the stage buffer.
        let png = codec.encode(&out_img, &OutputEncoding::png_fast())?;
        ticket.release(out_img.into_data());
        held_png = Some(png);
    }

    Err(Error::invariant("progressive plan had no stages"))
}

/// Applies the remaining multiplicative scale in a single CPU Lanczos-3
/// pass and re-verifies total-scale equality.
fn handoff_to_cpu(
    current: Image,
    cumulative: f64,
    target_scale: f64,
    final_w: u32,
    final_h: u32,
    cpu: &dyn ScaleBackend,
    progress: &ProgressSender,
) -> Result<Image> {
    let remaining = target_scale / cumulative;
    let expected_w = current.width() as f64 * remaining;
    let expected_h = current.height() as f64 * remaining;
    if (expected_w - final_w as f64).abs() > HANDOFF_TOLERANCE_PX
        || (expected_h - final_h as f64).abs() > HANDOFF_TOLERANCE_PX
    {
        return Err(Error::invariant(format!(
            "handoff scale {remaining:.4} lands at {expected_w:.1}x{expected_h:.1}, \
             expected {final_w}x{final_h}"
        )));
    }

    progress.emit(
        Stage::Processing,
        85.0,
        format!("CPU handoff: remaining {remaining:.2}x with lanczos3"),
    );
    cpu.resample(&current, final_w, final_h, Algorithm::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_scale_single_stage() {
        let plan = ScalingPlan::build(2.5).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.stages[0].step_scale, 2.5);
        assert_eq!(plan.stages[0].algorithm, Algorithm::Bicubic);
    }

    #[test]
    fn test_4x_is_two_doublings() {
        let plan = ScalingPlan::build(4.0).unwrap();
        let steps: Vec<f64> = plan.stages.iter().map(|s| s.step_scale).collect();
        assert_eq!(steps, vec![2.0, 2.0]);
    }

    #[test]
    fn test_greedy_steps_for_6x() {
        let plan = ScalingPlan::build(6.0).unwrap();
        let steps: Vec<f64> = plan.stages.iter().map(|s| s.step_scale).collect();
        // 6 = 2 * 2 * 1.5
        assert_eq!(steps, vec![2.0, 2.0, 1.5]);
    }

    #[test]
    fn test_residual_stage() {
        let plan = ScalingPlan::build(5.0).unwrap();
        let product: f64 = plan.stages.iter().map(|s| s.step_scale).product();
        assert!((product - 5.0).abs() <= 0.01 * 5.0);
        // 5 / 2 / 2 = 1.25, then 1.1 steps until only a residual remains.
        let steps: Vec<f64> = plan.stages.iter().map(|s| s.step_scale).collect();
        assert_eq!(steps[..4], [2.0, 2.0, 1.1, 1.1]);
        assert_eq!(steps.len(), 5);
        let residual = steps[4];
        assert!(residual > 1.0 && residual < 1.1);
    }

    #[test]
    fn test_product_within_tolerance_for_many_scales() {
        for scale in [3.1, 4.5, 7.3, 8.0, 9.9, 12.0, 15.0] {
            let plan = ScalingPlan::build(scale).unwrap();
            let product: f64 = plan.stages.iter().map(|s| s.step_scale).product();
            assert!(
                (product - scale).abs() <= PLAN_TOLERANCE * scale,
                "scale {scale}: product {product}"
            );
        }
    }

    #[test]
    fn test_step_algorithms() {
        let plan = ScalingPlan::build(6.0).unwrap();
        assert_eq!(plan.stages[0].algorithm, Algorithm::Bilinear);
        assert_eq!(plan.stages[2].algorithm, Algorithm::Fractional1_5x);
    }

    #[test]
    fn test_rejects_downscale() {
        assert!(ScalingPlan::build(0.5).is_err());
    }
}
