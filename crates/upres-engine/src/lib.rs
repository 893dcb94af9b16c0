//! # upres-engine
//!
//! The scaling pipeline: policy-driven mode selection, overlap tiling
//! with parallel workers, multi-stage progressive plans, a pooled memory
//! manager with pressure-driven release, CPU and optional GPU backends,
//! and a bridge to an external face-restoration program.
//!
//! # Modules
//!
//! - [`policy`] - Mode selection rules
//! - [`grid`] - Tile geometry and stitch crops
//! - [`tiler`] - Parallel tile workers and the stitcher
//! - [`progressive`] - Multi-stage plans and hybrid handoff
//! - [`pool`] - Buffer pool / memory manager
//! - [`backend`] - CPU and wgpu compute backends
//! - [`face`] - Face-restoration subprocess bridge
//! - [`limits`] - Device memory probing and budgets
//!
//! # Example
//!
//! ```ignore
//! use upres_engine::{ScaleRequest, Upscaler};
//!
//! let engine = Upscaler::with_defaults();
//! let request = ScaleRequest::new(input_bytes, 2.0);
//! let (result, events) = engine.upscale(&request);
//! let output_bytes = result?;
//! ```
//!
//! # Feature Flags
//!
//! - `wgpu` - GPU backend via wgpu (Vulkan/Metal/DX12)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
mod engine;
pub mod face;
pub mod grid;
pub mod limits;
mod options;
pub mod policy;
pub mod pool;
pub mod progressive;
pub mod tiler;

pub use engine::Upscaler;
pub use options::{EngineConfig, ScaleOptions, ScaleRequest};
pub use policy::Mode;
