//! The conversion engine boundary.
//!
//! The layout/OCR/LLM intelligence lives in the external marker engine; this
//! crate only needs three things from it, captured by [`ConversionEngine`]:
//! convert one document into a working directory, and read back the primary
//! text. Everything is synchronous because the engine is: callers run it
//! through `tokio::task::spawn_blocking` (see [`crate::pipeline::invoke`]).
//!
//! ## Isolation
//!
//! The engine misbehaves under multi-threaded numeric-library defaults and is
//! not safe for concurrent use inside one process. [`MarkerCliEngine`] runs
//! every conversion in its own child process with all numeric thread pools
//! pinned to one thread and a wall-clock timeout that kills the child. A
//! crash, hang or thread-safety fault therefore takes down one document, not
//! the service.
//!
//! ## Lifecycle
//!
//! [`EngineHandle`] is created once at service startup and owned by the
//! service. Initialisation failure is kept on the handle and surfaces through
//! [`crate::status`]; conversion attempts fail fast with
//! [`ServiceError::EngineUnavailable`].

use crate::config::ServiceConfig;
use crate::error::{DocumentError, ServiceError};
use crate::options::{EngineConfig, OutputFormat};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Environment applied to every engine process.
pub const THREAD_PINNING_ENV: &[(&str, &str)] = &[
    ("OMP_NUM_THREADS", "1"),
    ("MKL_NUM_THREADS", "1"),
    ("OPENBLAS_NUM_THREADS", "1"),
    ("NUMEXPR_NUM_THREADS", "1"),
    ("VECLIB_MAXIMUM_THREADS", "1"),
    ("NUMBA_NUM_THREADS", "1"),
    ("TOKENIZERS_PARALLELISM", "false"),
    ("MKL_DYNAMIC", "FALSE"),
    ("OMP_DYNAMIC", "FALSE"),
    ("PYTORCH_ENABLE_MPS_FALLBACK", "1"),
    ("IN_STREAMLIT", "true"),
    ("GRPC_VERBOSITY", "ERROR"),
    ("GLOG_minloglevel", "2"),
];

/// File names the engine run leaves in the working directory. Both start
/// with a dot so the output collector skips them.
pub const CONFIG_FILE_NAME: &str = ".engine_config.json";
pub const STDOUT_LOG_NAME: &str = ".engine_stdout.log";
pub const STDERR_LOG_NAME: &str = ".engine_stderr.log";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_BYTES: usize = 2000;

/// What one engine run produced.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// Directory the engine wrote its artifacts into.
    pub output_dir: PathBuf,
    /// The primary converted file (Markdown, HTML or JSON).
    pub primary: PathBuf,
    pub format: OutputFormat,
    /// Engine-reported metadata, `Null` when none was written.
    pub metadata: serde_json::Value,
}

/// Primary text read back from a [`RenderedDocument`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractedText {
    pub text: String,
    pub format: OutputFormat,
    pub metadata: serde_json::Value,
}

/// An opaque, expensive, synchronous document converter.
///
/// Implementations must be `Send + Sync` so one instance can be shared by
/// the service; they need not support concurrent `convert` calls, the
/// service serialises them.
pub trait ConversionEngine: Send + Sync {
    /// Short name for logs and status messages.
    fn name(&self) -> &str;

    /// Convert `document`, writing every artifact under `output_dir`.
    fn convert(
        &self,
        document: &Path,
        output_dir: &Path,
        config: &EngineConfig,
    ) -> Result<RenderedDocument, DocumentError>;

    /// Read the primary text of a finished conversion.
    fn extract_text(&self, rendered: &RenderedDocument) -> Result<ExtractedText, DocumentError> {
        let text = std::fs::read_to_string(&rendered.primary)?;
        Ok(ExtractedText {
            text,
            format: rendered.format,
            metadata: rendered.metadata.clone(),
        })
    }
}

// ── Engine handle ────────────────────────────────────────────────────────

/// The service's single, explicitly owned engine instance.
#[derive(Clone)]
pub struct EngineHandle {
    state: Result<Arc<dyn ConversionEngine>, String>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            Ok(engine) => f
                .debug_struct("EngineHandle")
                .field("engine", &engine.name())
                .finish(),
            Err(reason) => f
                .debug_struct("EngineHandle")
                .field("failed", reason)
                .finish(),
        }
    }
}

impl EngineHandle {
    /// Run an initialiser and keep its outcome, success or failure.
    pub fn initialize<E, F>(init: F) -> Self
    where
        E: ConversionEngine + 'static,
        F: FnOnce() -> Result<E, ServiceError>,
    {
        match init() {
            Ok(engine) => {
                info!("Conversion engine '{}' initialised", engine.name());
                Self::ready(Arc::new(engine))
            }
            Err(e) => {
                warn!("Conversion engine failed to initialise: {}", e);
                Self::failed(e.to_string())
            }
        }
    }

    /// Wrap an already constructed engine.
    pub fn ready(engine: Arc<dyn ConversionEngine>) -> Self {
        Self { state: Ok(engine) }
    }

    /// A handle whose initialisation failed with `reason`.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: Err(reason.into()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_ok()
    }

    /// Reason initialisation failed, if it did.
    pub fn failure_reason(&self) -> Option<&str> {
        self.state.as_ref().err().map(String::as_str)
    }

    /// The engine, or a fail-fast [`ServiceError::EngineUnavailable`].
    pub fn engine(&self) -> Result<Arc<dyn ConversionEngine>, ServiceError> {
        match &self.state {
            Ok(engine) => Ok(Arc::clone(engine)),
            Err(reason) => Err(ServiceError::EngineUnavailable {
                reason: reason.clone(),
            }),
        }
    }
}

// ── Process-isolated marker engine ───────────────────────────────────────

/// Runs the marker CLI (`marker_single`) once per document in a child
/// process.
#[derive(Debug, Clone)]
pub struct MarkerCliEngine {
    program: PathBuf,
    extra_args: Vec<String>,
    timeout: Duration,
    pin_threads: bool,
}

impl MarkerCliEngine {
    /// Resolve the engine executable named in `config`.
    pub fn initialize(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let program = which::which(&config.engine_program).map_err(|e| {
            ServiceError::EngineNotFound {
                program: config.engine_program.clone(),
                detail: e.to_string(),
            }
        })?;
        debug!("Resolved engine executable: {}", program.display());
        Ok(Self {
            program,
            extra_args: config.engine_args.clone(),
            timeout: Duration::from_secs(config.engine_timeout_secs),
            pin_threads: config.pin_engine_threads,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, document: &Path, output_dir: &Path, config_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(document)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--config_json")
            .arg(config_path)
            .args(&self.extra_args)
            .stdin(Stdio::null());
        if self.pin_threads {
            cmd.envs(THREAD_PINNING_ENV.iter().copied());
        }
        cmd
    }

    /// Wait for `child` until it exits or the timeout elapses.
    fn wait_with_timeout(
        &self,
        child: &mut std::process::Child,
    ) -> Result<std::process::ExitStatus, DocumentError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(
                    "Engine exceeded {}s, killing pid {}",
                    self.timeout.as_secs(),
                    child.id()
                );
                if let Err(e) = child.kill() {
                    warn!("Failed to kill engine process: {}", e);
                }
                let _ = child.wait();
                return Err(DocumentError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ConversionEngine for MarkerCliEngine {
    fn name(&self) -> &str {
        "marker"
    }

    fn convert(
        &self,
        document: &Path,
        output_dir: &Path,
        config: &EngineConfig,
    ) -> Result<RenderedDocument, DocumentError> {
        let config_path = output_dir.join(CONFIG_FILE_NAME);
        let options = config.to_engine_options(output_dir);
        let json = serde_json::to_vec_pretty(&options)
            .map_err(|e| DocumentError::Internal(format!("engine config: {e}")))?;
        std::fs::write(&config_path, json)?;

        let stdout = File::create(output_dir.join(STDOUT_LOG_NAME))?;
        let stderr_path = output_dir.join(STDERR_LOG_NAME);
        let stderr = File::create(&stderr_path)?;

        let start = Instant::now();
        let mut child = self
            .command(document, output_dir, &config_path)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| DocumentError::EngineFailed {
                status: "spawn failed".into(),
                stderr: e.to_string(),
            })?;
        debug!("Engine pid {} started for {}", child.id(), document.display());

        let status = self.wait_with_timeout(&mut child)?;
        debug!("Engine finished in {}ms with {}", start.elapsed().as_millis(), status);

        if !status.success() {
            return Err(DocumentError::EngineFailed {
                status: status.to_string(),
                stderr: read_tail(&stderr_path, STDERR_TAIL_BYTES),
            });
        }

        let stem = document
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let primary = find_primary_output(output_dir, &stem, config.output_format).ok_or_else(
            || DocumentError::MissingOutput {
                dir: output_dir.to_path_buf(),
                format: config.output_format.to_string(),
            },
        )?;
        let metadata = read_metadata(output_dir, &stem);

        Ok(RenderedDocument {
            output_dir: output_dir.to_path_buf(),
            primary,
            format: config.output_format,
            metadata,
        })
    }
}

/// Locate `<stem>.<ext>` under `dir`, falling back to any file with that
/// extension. Dotfiles are never candidates.
pub fn find_primary_output(dir: &Path, stem: &str, format: OutputFormat) -> Option<PathBuf> {
    let ext = format.extension();
    let wanted = format!("{stem}.{ext}");
    let candidates: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|x| x.eq_ignore_ascii_case(ext))
        })
        .map(|e| e.into_path())
        .collect();

    candidates
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == wanted))
        .or_else(|| {
            // The metadata file shares the json extension; never mistake it
            // for the document itself.
            candidates.iter().find(|p| {
                !p.file_name()
                    .is_some_and(|n| n.to_string_lossy().ends_with("_meta.json"))
            })
        })
        .cloned()
}

fn read_metadata(dir: &Path, stem: &str) -> serde_json::Value {
    let wanted = format!("{stem}_meta.json");
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == wanted)
        .and_then(|e| std::fs::read(e.path()).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or(serde_json::Value::Null)
}

fn read_tail(path: &Path, max_bytes: usize) -> String {
    let bytes = std::fs::read(path).unwrap_or_default();
    let start = bytes.len().saturating_sub(max_bytes);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
