//! Bridge to the external face-restoration program.
//!
//! The program is a black box invoked as
//! `<program> <script> -w 0.05 --input_path <file> --output_path <dir>`
//! from a fixed working directory, with one environment variable carrying
//! a VRAM-split hint. The bridge owns the temporary input file and output
//! directory and removes both on every exit path: success, failure,
//! timeout, and cancellation.
//!
//! The bridge only restores; it never scales. Callers compose it with the
//! resampling pipeline (restoration is a fixed 2x pass, then residual
//! scaling).

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};
use upres_core::{CancellationToken, Error, Image, Result};
use upres_io::{CodecAdapter, OutputEncoding};

/// Wall-clock deadline for the child process.
pub const ENHANCE_DEADLINE: Duration = Duration::from_secs(30);

/// Stdout marker meaning the program found no faces.
pub const NO_FACES_MARKER: &str = "detect 0 faces";

/// Fixed scale the restoration model applies.
pub const ENHANCE_SCALE: f64 = 2.0;

/// Subdirectory the program writes results into.
const RESULTS_SUBDIR: &str = "final_results";

/// Poll interval while waiting for the child.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration of the external program, known at startup.
#[derive(Debug, Clone)]
pub struct FaceEnhanceConfig {
    /// Interpreter or executable to invoke.
    pub program: PathBuf,
    /// Script passed as the first argument.
    pub script: PathBuf,
    /// Working directory for the child.
    pub working_dir: PathBuf,
    /// VRAM-split hint passed through the environment.
    pub vram_split: f64,
    /// Wall-clock deadline; [`ENHANCE_DEADLINE`] unless overridden.
    pub deadline: Duration,
}

impl FaceEnhanceConfig {
    /// Creates a config with the default deadline and VRAM split.
    pub fn new(program: PathBuf, script: PathBuf, working_dir: PathBuf) -> Self {
        Self {
            program,
            script,
            working_dir,
            vram_split: 0.5,
            deadline: ENHANCE_DEADLINE,
        }
    }

    /// Whether the program and script exist on disk.
    pub fn is_available(&self) -> bool {
        self.program.exists() && self.script.exists()
    }
}

/// Result of a bridge run.
#[derive(Debug)]
pub struct FaceEnhanceOutcome {
    /// The restored image (2x the input).
    pub image: Image,
    /// `false` when the program reported `detect 0 faces`; callers then
    /// fall back to traditional resampling.
    pub faces_found: bool,
}

/// Runs the external program over `source`.
///
/// # Errors
///
/// - [`Error::EnhanceTimeout`] when the deadline expires (the child is
///   terminated).
/// - [`Error::EnhanceFailed`] on non-zero exit or missing output.
/// - [`Error::Cancelled`] when the token fires mid-run.
pub fn enhance(
    config: &FaceEnhanceConfig,
    source: &Image,
    codec: &CodecAdapter,
    cancel: &CancellationToken,
) -> Result<FaceEnhanceOutcome> {
    // Scratch space is owned by this frame: both are removed on drop,
    // whichever way we leave.
    let input_file = write_input(source, codec)?;
    let output_dir = TempDir::new()
        .map_err(|e| Error::enhance_failed(format!("cannot create output dir: {e}")))?;

    info!(
        program = %config.program.display(),
        input = %input_file.path().display(),
        "spawning face restoration"
    );

    let mut child = Command::new(&config.program)
        .arg(&config.script)
        .args(["-w", "0.05"])
        .arg("--input_path")
        .arg(input_file.path())
        .arg("--output_path")
        .arg(output_dir.path())
        .current_dir(&config.working_dir)
        .env("ENHANCE_VRAM_SPLIT", format!("{}", config.vram_split))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::enhance_failed(format!("spawn failed: {e}")))?;

    // Drain the pipes off-thread so a chatty child cannot fill them and
    // stall while we poll.
    let stdout = pipe_reader(child.stdout.take());
    let stderr = pipe_reader(child.stderr.take());

    let status = wait_with_deadline(&mut child, config.deadline, cancel)?;

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    if !status.success() {
        let trail = stderr.lines().last().unwrap_or("").to_string();
        return Err(Error::enhance_failed(format!(
            "exit status {status}: {trail}"
        )));
    }

    let faces_found = !stdout.contains(NO_FACES_MARKER);
    if !faces_found {
        debug!("restoration program reported no faces");
    }

    let result_path = first_result_file(output_dir.path())?;
    let bytes = std::fs::read(&result_path)
        .map_err(|e| Error::enhance_failed(format!("cannot read result: {e}")))?;
    let image = codec
        .decode_pixels(&bytes)
        .map_err(|e| Error::enhance_failed(format!("cannot decode result: {e}")))?;

    Ok(FaceEnhanceOutcome { image, faces_found })
}

/// Writes the source image to a temporary PNG.
fn write_input(source: &Image, codec: &CodecAdapter) -> Result<NamedTempFile> {
    let bytes = codec
        .encode(source, &OutputEncoding::png_fast())
        .map_err(|e| Error::enhance_failed(format!("cannot encode input: {e}")))?;
    let file = tempfile::Builder::new()
        .prefix("upres-face-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| Error::enhance_failed(format!("cannot create input file: {e}")))?;
    std::fs::write(file.path(), &bytes)
        .map_err(|e| Error::enhance_failed(format!("cannot write input file: {e}")))?;
    Ok(file)
}

/// Polls the child until exit, deadline, or cancellation.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<std::process::ExitStatus> {
    let started = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| Error::enhance_failed(format!("wait failed: {e}")))?
        {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            warn!("cancellation: terminating restoration child");
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        if started.elapsed() >= deadline {
            warn!(deadline_secs = deadline.as_secs(), "restoration deadline expired");
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::EnhanceTimeout {
                deadline_secs: deadline.as_secs(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Collects a child pipe into a string on a helper thread.
fn pipe_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

/// First file (by name) in `<outdir>/final_results/`.
fn first_result_file(outdir: &std::path::Path) -> Result<PathBuf> {
    let results = outdir.join(RESULTS_SUBDIR);
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&results)
        .map_err(|_| Error::enhance_failed(format!("missing {RESULTS_SUBDIR} directory")))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();
    entries
        .into_iter()
        .next()
        .ok_or_else(|| Error::enhance_failed(format!("no output file in {RESULTS_SUBDIR}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a stub restoration script and returns its config.
    ///
    /// The stub receives `-w 0.05 --input_path IN --output_path OUT`.
    fn stub_config(dir: &std::path::Path, body: &str) -> FaceEnhanceConfig {
        let script = dir.join("stub.sh");
        let mut f = std::fs::File::create(&script).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        let mut config = FaceEnhanceConfig::new(
            PathBuf::from("/bin/sh"),
            script,
            dir.to_path_buf(),
        );
        config.deadline = Duration::from_secs(5);
        config
    }

    fn small_image() -> Image {
        let mut img = Image::new(8, 8, 3);
        img.data_mut().fill(0.5);
        img
    }

    #[test]
    fn test_success_with_faces() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(
            dir.path(),
            r#"mkdir -p "$6/final_results" && cp "$4" "$6/final_results/out.png" && echo "detect 2 faces""#,
        );
        let codec = CodecAdapter::new();
        let outcome = enhance(&config, &small_image(), &codec, &CancellationToken::new()).unwrap();
        assert!(outcome.faces_found);
        assert_eq!(outcome.image.dimensions(), (8, 8));
    }

    #[test]
    fn test_no_faces_signal() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(
            dir.path(),
            r#"mkdir -p "$6/final_results" && cp "$4" "$6/final_results/out.png" && echo "detect 0 faces""#,
        );
        let codec = CodecAdapter::new();
        let outcome = enhance(&config, &small_image(), &codec, &CancellationToken::new()).unwrap();
        assert!(!outcome.faces_found);
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(dir.path(), "exit 3");
        let codec = CodecAdapter::new();
        let err = enhance(&config, &small_image(), &codec, &CancellationToken::new()).unwrap_err();
        assert!(err.is_enhance_fallback());
    }

    #[test]
    fn test_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(dir.path(), r#"echo "detect 1 faces""#);
        let codec = CodecAdapter::new();
        let err = enhance(&config, &small_image(), &codec, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::EnhanceFailed { .. }));
    }

    #[test]
    fn test_deadline_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = stub_config(dir.path(), "sleep 60");
        config.deadline = Duration::from_millis(400);
        let codec = CodecAdapter::new();
        let started = Instant::now();
        let err = enhance(&config, &small_image(), &codec, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::EnhanceTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancellation_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(dir.path(), "sleep 60");
        let codec = CodecAdapter::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = enhance(&config, &small_image(), &codec, &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_availability_checks_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub_config(dir.path(), "exit 0");
        assert!(config.is_available());

        let missing = FaceEnhanceConfig::new(
            PathBuf::from("/bin/sh"),
            dir.path().join("nope.py"),
            dir.path().to_path_buf(),
        );
        assert!(!missing.is_available());
    }
}
