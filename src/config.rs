//! Service-level configuration.
//!
//! Per-request engine options arrive as a flat option bag and are normalised
//! into [`crate::options::EngineConfig`]. Everything that stays fixed for the
//! lifetime of a [`crate::service::MarkerService`] lives here instead, built
//! via [`ServiceConfig::builder()`].

use crate::error::ServiceError;
use std::path::PathBuf;

/// Default executable name of the marker single-document CLI.
pub const DEFAULT_ENGINE_PROGRAM: &str = "marker_single";

/// Default wall-clock budget for one engine run.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;

/// Fixed location older engine releases dump debug data to, relative to the
/// process working directory.
pub const DEFAULT_LEGACY_DEBUG_DIR: &str = "debug_data";

/// Configuration for a [`crate::service::MarkerService`].
///
/// # Example
/// ```rust
/// use marker_gateway::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .engine_program("/opt/marker/bin/marker_single")
///     .engine_timeout_secs(300)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_conversions, 1);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Engine executable, resolved on `PATH` when not absolute.
    /// Default: `marker_single`.
    pub engine_program: String,

    /// Extra arguments appended to every engine invocation.
    pub engine_args: Vec<String>,

    /// Seconds one engine run may take before it is killed. Default: 600.
    pub engine_timeout_secs: u64,

    /// Parent directory for per-document working directories.
    /// Default: the system temp dir.
    pub work_root: PathBuf,

    /// Directory batch archives are written to. Default: the system temp dir.
    pub archive_dir: PathBuf,

    /// Legacy debug directory merged into every document's debug set.
    /// `None` disables the scan. Default: `debug_data`.
    pub legacy_debug_dir: Option<PathBuf>,

    /// Engine invocations allowed in flight at once. Default: 1.
    ///
    /// The engine is not safe for concurrent use; raise this only when each
    /// run is process-isolated and the host has the memory for it.
    pub max_concurrent_conversions: usize,

    /// Pin numeric-library thread pools of the engine process to one thread.
    /// Default: true.
    pub pin_engine_threads: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine_program: DEFAULT_ENGINE_PROGRAM.to_string(),
            engine_args: Vec::new(),
            engine_timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            work_root: std::env::temp_dir(),
            archive_dir: std::env::temp_dir(),
            legacy_debug_dir: Some(PathBuf::from(DEFAULT_LEGACY_DEBUG_DIR)),
            max_concurrent_conversions: 1,
            pin_engine_threads: true,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn engine_program(mut self, program: impl Into<String>) -> Self {
        self.config.engine_program = program.into();
        self
    }

    pub fn engine_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.engine_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs;
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = dir.into();
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.archive_dir = dir.into();
        self
    }

    pub fn legacy_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.legacy_debug_dir = dir;
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n;
        self
    }

    pub fn pin_engine_threads(mut self, v: bool) -> Self {
        self.config.pin_engine_threads = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.engine_program.trim().is_empty() {
            return Err(ServiceError::InvalidConfig(
                "Engine program must not be empty".into(),
            ));
        }
        if c.engine_timeout_secs == 0 {
            return Err(ServiceError::InvalidConfig(
                "Engine timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_concurrent_conversions == 0 {
            return Err(ServiceError::InvalidConfig(
                "max_concurrent_conversions must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
