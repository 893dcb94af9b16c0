//! upres - command-line image upscaler.
//!
//! Reads a raster image, scales it by the requested factor through the
//! upres engine, and writes the encoded result. Progress is reported on
//! stderr; `-v` raises log verbosity.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use upres_core::{CancellationToken, Stage};
use upres_engine::backend::describe_backends;
use upres_engine::face::FaceEnhanceConfig;
use upres_engine::{EngineConfig, ScaleOptions, ScaleRequest, Upscaler};
use upres_io::{ImageFormat, OutputEncoding, PngCompression, TiffCompression};
use upres_kernels::Algorithm;

/// Image upscaler: memory-budgeted resampling with tiling, progressive
/// plans, and optional face restoration.
#[derive(Debug, Parser)]
#[command(name = "upres", version, about)]
struct Args {
    /// Input image (png, jpeg, tiff, webp).
    input: Option<PathBuf>,

    /// Output path; the extension picks the format unless --format is
    /// given.
    output: Option<PathBuf>,

    /// Scale factor, >= 1.0.
    #[arg(short, long, default_value_t = 2.0)]
    scale: f64,

    /// Kernel override: bilinear, bicubic, lanczos2, lanczos3,
    /// fractional-1.1x, fractional-1.5x, progressive.
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Output format override: png, jpeg, tiff, webp.
    #[arg(short, long)]
    format: Option<String>,

    /// JPEG/WebP quality (1-100).
    #[arg(short, long, default_value_t = 90)]
    quality: u8,

    /// TIFF compression: lzw, none.
    #[arg(long, default_value = "lzw")]
    compression: String,

    /// Worker count for tiled processing (1-16).
    #[arg(long, default_value_t = 6)]
    concurrency: usize,

    /// Disable parallel tile processing.
    #[arg(long)]
    no_parallel: bool,

    /// Force the CPU backend.
    #[arg(long)]
    force_cpu: bool,

    /// Force the GPU backend; fail instead of downgrading.
    #[arg(long)]
    force_gpu: bool,

    /// Face enhancement: on, off, or auto (default).
    #[arg(long, default_value = "auto")]
    face_enhance: String,

    /// Face-restoration interpreter (e.g. a python binary).
    #[arg(long)]
    face_program: Option<PathBuf>,

    /// Face-restoration script passed to the interpreter.
    #[arg(long)]
    face_script: Option<PathBuf>,

    /// Working directory for the face-restoration process.
    #[arg(long)]
    face_workdir: Option<PathBuf>,

    /// GPU memory budget override, in bytes.
    #[arg(long)]
    memory_budget_gpu: Option<u64>,

    /// CPU memory budget override, in bytes.
    #[arg(long)]
    memory_budget_cpu: Option<u64>,

    /// List compute backends and exit.
    #[arg(long)]
    backends: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.backends {
        print!("{}", describe_backends());
        return Ok(());
    }

    let input_path = args
        .input
        .clone()
        .context("missing input path (see --help)")?;
    let output_path = args
        .output
        .clone()
        .context("missing output path (see --help)")?;

    let input = std::fs::read(&input_path)
        .with_context(|| format!("cannot read {}", input_path.display()))?;

    let encoding = resolve_encoding(&args, &output_path)?;
    let options = resolve_options(&args)?;
    let engine = Upscaler::new(EngineConfig {
        face: face_config(&args),
        ..Default::default()
    });

    let request = ScaleRequest {
        input,
        scale: args.scale,
        encoding,
        options,
    };

    // Progress rides its own thread so the pipeline never blocks on a
    // slow terminal.
    let (progress, events) = upres_core::progress::channel();
    let reporter = std::thread::spawn(move || {
        for event in events {
            match event.stage {
                Stage::Error => eprintln!("error: {}", event.message),
                Stage::Complete => eprintln!("done: {}", event.message),
                stage => {
                    eprintln!("[{:>5.1}%] {}: {}", event.percent, stage.as_str(), event.message)
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let result = engine.run(&request, &progress, &cancel);
    drop(progress);
    let _ = reporter.join();

    let bytes = result.map_err(|e| anyhow::anyhow!("{e}"))?;
    std::fs::write(&output_path, bytes)
        .with_context(|| format!("cannot write {}", output_path.display()))?;
    Ok(())
}

/// Maps `-v` counts onto an `EnvFilter`, deferring to `RUST_LOG`.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "upres=info",
        2 => "upres=debug",
        _ => "upres=trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Output encoding from --format (or the output extension) plus the
/// format-specific options.
fn resolve_encoding(args: &Args, output: &std::path::Path) -> Result<OutputEncoding> {
    let format = match &args.format {
        Some(name) => name.parse::<ImageFormat>()?,
        None => output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.parse::<ImageFormat>())
            .transpose()?
            .unwrap_or(ImageFormat::Png),
    };
    if !(1..=100).contains(&args.quality) {
        bail!("quality {} outside 1..=100", args.quality);
    }
    Ok(match format {
        ImageFormat::Png => OutputEncoding::Png {
            compression: PngCompression::Default,
        },
        ImageFormat::Jpeg => OutputEncoding::Jpeg {
            quality: args.quality,
        },
        ImageFormat::Tiff => OutputEncoding::Tiff {
            compression: args.compression.parse::<TiffCompression>()?,
        },
        ImageFormat::WebP => OutputEncoding::WebP {
            quality: args.quality,
        },
    })
}

fn resolve_options(args: &Args) -> Result<ScaleOptions> {
    let algorithm = args
        .algorithm
        .as_deref()
        .map(str::parse::<Algorithm>)
        .transpose()?;
    let face_enhance = match args.face_enhance.as_str() {
        "auto" => None,
        "on" | "true" => Some(true),
        "off" | "false" => Some(false),
        other => bail!("face-enhance must be on, off, or auto (got {other})"),
    };
    // UPRES_BACKEND=cpu pins the backend when no flag says otherwise.
    let env_cpu = !args.force_cpu
        && !args.force_gpu
        && upres_engine::limits::backend_override().as_deref() == Some("cpu");
    Ok(ScaleOptions {
        algorithm,
        parallel_concurrency: args.concurrency,
        enable_parallel_processing: !args.no_parallel,
        force_cpu: args.force_cpu || env_cpu,
        force_gpu: args.force_gpu,
        face_enhance,
        memory_budget_gpu_bytes: args.memory_budget_gpu,
        memory_budget_cpu_bytes: args.memory_budget_cpu,
    })
}

fn face_config(args: &Args) -> Option<FaceEnhanceConfig> {
    let program = args.face_program.clone()?;
    let script = args.face_script.clone()?;
    let workdir = args
        .face_workdir
        .clone()
        .or_else(|| script.parent().map(PathBuf::from))?;
    Some(FaceEnhanceConfig::new(program, script, workdir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["upres", "in.png", "out.png", "--scale", "3.5"]);
        assert_eq!(args.scale, 3.5);
        assert!(!args.force_cpu);
    }

    #[test]
    fn test_encoding_from_extension() {
        let args = Args::parse_from(["upres", "in.png", "out.jpg"]);
        let enc = resolve_encoding(&args, std::path::Path::new("out.jpg")).unwrap();
        assert_eq!(enc.format(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_format_flag_overrides_extension() {
        let args = Args::parse_from(["upres", "in.png", "out.jpg", "--format", "webp"]);
        let enc = resolve_encoding(&args, std::path::Path::new("out.jpg")).unwrap();
        assert_eq!(enc.format(), ImageFormat::WebP);
    }

    #[test]
    fn test_face_enhance_flag_values() {
        let args = Args::parse_from(["upres", "a", "b", "--face-enhance", "off"]);
        let opts = resolve_options(&args).unwrap();
        assert_eq!(opts.face_enhance, Some(false));

        let args = Args::parse_from(["upres", "a", "b"]);
        let opts = resolve_options(&args).unwrap();
        assert_eq!(opts.face_enhance, None);
    }

    #[test]
    fn test_bad_algorithm_rejected() {
        let args = Args::parse_from(["upres", "a", "b", "--algorithm", "nearest"]);
        assert!(resolve_options(&args).is_err());
    }
}
