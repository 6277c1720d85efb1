//! # marker-gateway
//!
//! Serve the marker PDF converter (PDF → Markdown / HTML / JSON) to agents and
//! humans without letting its quirks leak into the host service.
//!
//! The conversion intelligence (layout detection, OCR, table and equation
//! recognition, optional LLM refinement) lives entirely in the external
//! engine. This crate does the orchestration around it:
//!
//! * turn a loose option bag into a typed engine configuration, with the
//!   engine pinned to a single worker;
//! * run each conversion in an isolated engine process, off the async
//!   runtime, one at a time;
//! * collect what the engine wrote and package a batch into one zip with a
//!   combined Markdown overview.
//!
//! ## Pipeline Overview
//!
//! ```text
//! options ─▶ normalize ─▶ invoke (per document) ─▶ collect ─▶ archive
//!                              │
//!                              └─ marker_single in a child process,
//!                                 thread pools pinned, wall-clock timeout
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marker_gateway::{BatchOptions, DocumentInput, MarkerService, ServiceConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MarkerService::new(ServiceConfig::default());
//!     eprintln!("{}", service.status().message);
//!
//!     let options = json!({ "output_format": "markdown", "force_ocr": "true" });
//!     let docs = vec![DocumentInput::Path("paper.pdf".into())];
//!     let outcome = service
//!         .convert_batch(docs, &options, &BatchOptions::from_options(&options))
//!         .await?;
//!     println!("{}", outcome.archive.archive_path.display());
//!     outcome.cleanup();
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `marker-gateway` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod options;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod service;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use engine::{ConversionEngine, EngineHandle, ExtractedText, MarkerCliEngine, RenderedDocument};
pub use error::{DocumentError, ServiceError};
pub use options::{EngineConfig, LlmConfig, LlmProvider, LlmProviderKind, OutputFormat};
pub use output::{
    BatchArchive, BatchOutcome, BatchReport, BatchSummary, ConversionResult, DocumentReport,
};
pub use pipeline::archive::{archive_results, cleanup_working_dirs, BatchOptions};
pub use pipeline::collect::{collect, CollectedFiles};
pub use pipeline::invoke::{convert_one, ConversionRequest, DocumentInput};
pub use pipeline::normalize::{normalize, normalize_with_warnings, OptionWarning};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::MarkerService;
pub use status::{ServiceStatus, StatusKind};
