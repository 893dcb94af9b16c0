//! wgpu compute backend.
//!
//! Runs the resampling kernels as a compute shader (one invocation per
//! output pixel) with storage-buffer round trips. Device limits feed the
//! memory manager: `max_buffer_size` bounds single allocations and the
//! total is estimated conservatively when the adapter cannot report it.

use std::sync::OnceLock;

use tracing::{debug, info};
use upres_core::{Error, Image, Result};
use upres_kernels::Algorithm;

use super::{Backend, ScaleBackend};
use crate::limits::{DeviceLimits, DEFAULT_TOTAL_MEMORY};

/// Shader source, compiled at backend construction.
const SHADER: &str = include_str!("resample.wgsl");

/// Cached availability probe; adapter enumeration is slow.
static AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Uniform parameter block matching `Params` in the shader.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    channels: u32,
    mode: u32,
    _pad0: u32,
    _pad1: u32,
}

/// GPU resampling backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    limits: DeviceLimits,
}

impl WgpuBackend {
    /// Whether a usable adapter is present.
    pub fn is_available() -> bool {
        *AVAILABLE.get_or_init(|| {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))
            .is_some()
        })
    }

    /// Creates the backend, requesting a device and building the
    /// resample pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] when no adapter is present
    /// or device creation fails.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Error::backend_unavailable("wgpu: no adapter"))?;

        let info = adapter.get_info();
        info!(name = %info.name, backend = ?info.backend, "wgpu adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("upres-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| Error::backend_unavailable(format!("wgpu: {e}")))?;

        let adapter_limits = adapter.limits();
        let limits = DeviceLimits::from_probe(
            adapter_limits.max_buffer_size,
            DEFAULT_TOTAL_MEMORY,
            true,
        );

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("upres-resample"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("upres-resample-layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("upres-resample-pipeline-layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("upres-resample-pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_layout,
            limits,
        })
    }

    fn shader_mode(algorithm: Algorithm) -> Result<u32> {
        match algorithm {
            Algorithm::Bilinear => Ok(0),
            Algorithm::Bicubic => Ok(1),
            Algorithm::Lanczos2 => Ok(2),
            Algorithm::Lanczos3 => Ok(3),
            Algorithm::Fractional1_1x => Ok(4),
            Algorithm::Fractional1_5x => Ok(5),
            Algorithm::Progressive => Err(Error::invariant(
                "progressive composition reached the GPU dispatch layer",
            )),
        }
    }

    fn dispatch(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
    ) -> Result<Vec<f32>> {
        use wgpu::util::DeviceExt;

        let mode = Self::shader_mode(algorithm)?;
        let channels = u32::from(src.channels());
        let dst_len = dst_w as usize * dst_h as usize * channels as usize;
        let dst_bytes = (dst_len * 4) as u64;

        debug!(
            dst_w,
            dst_h,
            mode,
            "dispatching resample compute pass"
        );

        let src_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("upres-src"),
                contents: bytemuck::cast_slice(src.data()),
                usage: wgpu::BufferUsages::STORAGE,
            });

        let dst_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("upres-dst"),
            size: dst_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("upres-readback"),
            size: dst_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params = Params {
            src_w: src.width(),
            src_h: src.height(),
            dst_w,
            dst_h,
            channels,
            mode,
            _pad0: 0,
            _pad1: 0,
        };
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("upres-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("upres-resample-bind"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("upres-resample-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("upres-resample-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dst_w.div_ceil(8), dst_h.div_ceil(8), 1);
        }
        encoder.copy_buffer_to_buffer(&dst_buffer, 0, &readback, 0, dst_bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| Error::backend_unavailable("wgpu: device lost during readback"))?
            .map_err(|e| Error::backend_unavailable(format!("wgpu: map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let out: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        readback.unmap();

        Ok(out)
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ScaleBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn kind(&self) -> Backend {
        Backend::Wgpu
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn concurrency_hint(&self) -> usize {
        // The device serializes dispatches; tile parallelism buys decode
        // and transfer overlap only.
        2
    }

    fn resample(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
    ) -> Result<Image> {
        let data = self.dispatch(src, dst_w, dst_h, algorithm)?;
        Image::from_data(dst_w, dst_h, src.channels(), data)
    }

    fn resample_into(
        &self,
        src: &Image,
        dst_w: u32,
        dst_h: u32,
        algorithm: Algorithm,
        out: &mut [f32],
    ) -> Result<()> {
        let data = self.dispatch(src, dst_w, dst_h, algorithm)?;
        if out.len() != data.len() {
            return Err(Error::invariant(format!(
                "readback length {} does not match output buffer {}",
                data.len(),
                out.len()
            )));
        }
        out.copy_from_slice(&data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Device-dependent; exercised only where an adapter exists.
    #[test]
    fn test_gpu_matches_cpu_on_constant() {
        if !WgpuBackend::is_available() {
            return;
        }
        let backend = WgpuBackend::new().unwrap();
        let mut src = Image::new(16, 16, 4);
        src.data_mut().fill(0.5);
        let out = backend
            .resample(&src, 32, 32, Algorithm::Bicubic)
            .unwrap();
        for &v in out.data() {
            assert!((v - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(WgpuBackend::shader_mode(Algorithm::Bilinear).unwrap(), 0);
        assert_eq!(WgpuBackend::shader_mode(Algorithm::Lanczos3).unwrap(), 3);
        assert!(WgpuBackend::shader_mode(Algorithm::Progressive).is_err());
    }
}
