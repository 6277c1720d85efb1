//! Result records produced by the conversion pipeline.

use crate::error::{DocumentError, ServiceError};
use crate::options::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of converting one document.
///
/// The working directory is owned by this result until it is archived and
/// cleaned up with [`crate::pipeline::archive::cleanup_working_dirs`]. It is
/// never removed automatically, so callers can still read the files after
/// conversion returns.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// File name of the input document, e.g. `report.pdf`.
    pub document_name: String,
    /// Primary converted text. Empty on failure.
    pub text: String,
    pub format: OutputFormat,
    /// Engine-reported metadata, `Null` when none.
    pub metadata: serde_json::Value,
    pub output_files: Vec<PathBuf>,
    pub debug_files: Vec<PathBuf>,
    pub image_files: Vec<PathBuf>,
    /// `None` on success.
    pub error: Option<DocumentError>,
    /// Scratch directory used for this conversion; `None` when the document
    /// was rejected before one was allocated.
    pub working_dir: Option<PathBuf>,
    pub duration_ms: u64,
}

impl ConversionResult {
    /// A failed result with no collected files.
    pub fn failed(
        document_name: impl Into<String>,
        error: DocumentError,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            document_name: document_name.into(),
            text: String::new(),
            format: OutputFormat::default(),
            metadata: serde_json::Value::Null,
            output_files: Vec::new(),
            debug_files: Vec::new(),
            image_files: Vec::new(),
            error: Some(error),
            working_dir,
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// The captured error message, or an empty string on success.
    pub fn error_message(&self) -> String {
        self.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
    }

    /// Document name without its extension, used for archive entry names.
    pub fn base_name(&self) -> &str {
        Path::new(&self.document_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.document_name)
    }

    /// Turn a failed result into [`ServiceError::ConversionFailed`].
    pub fn into_result(self) -> Result<Self, ServiceError> {
        match self.error {
            None => Ok(self),
            Some(source) => Err(ServiceError::ConversionFailed {
                document: self.document_name,
                source,
            }),
        }
    }

    /// Remove the working directory, if any. Failures are logged.
    pub fn cleanup(&self) {
        let Some(ref dir) = self.working_dir else {
            return;
        };
        match std::fs::remove_dir_all(dir) {
            Ok(()) => debug!("Removed working directory {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove working directory {}: {}", dir.display(), e),
        }
    }
}

/// A packaged batch: the archive file and the combined Markdown summary.
#[derive(Debug, Clone)]
pub struct BatchArchive {
    pub archive_path: PathBuf,
    pub combined_text: String,
    pub summary: BatchSummary,
}

impl BatchArchive {
    /// Delete the archive file.
    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.archive_path)
    }
}

/// What [`crate::service::MarkerService::convert_batch`] hands back: the
/// archive plus the per-document results whose working directories the
/// caller still owns.
#[derive(Debug)]
pub struct BatchOutcome {
    pub archive: BatchArchive,
    pub results: Vec<ConversionResult>,
}

impl BatchOutcome {
    /// Remove every working directory of this batch. The archive is kept.
    pub fn cleanup(&self) {
        crate::pipeline::archive::cleanup_working_dirs(&self.results);
    }
}

/// Document counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ConversionResult]) -> Self {
        let successful = results.iter().filter(|r| r.success()).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        }
    }
}

/// One entry of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub filename: String,
    pub success: bool,
    /// Converted text; empty on failure.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ConversionResult> for DocumentReport {
    fn from(r: &ConversionResult) -> Self {
        Self {
            filename: r.document_name.clone(),
            success: r.success(),
            content: r.text.clone(),
            error: r.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// JSON-friendly batch result for agent callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<DocumentReport>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn from_results(results: &[ConversionResult]) -> Self {
        Self {
            results: results.iter().map(DocumentReport::from).collect(),
            summary: BatchSummary::from_results(results),
        }
    }
}
