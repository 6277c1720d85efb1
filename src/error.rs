//! Error types for the marker-gateway library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ServiceError`] — **Fatal**: the operation cannot proceed at all
//!   (malformed options, engine never initialised, archive could not be
//!   written). Returned as `Err(ServiceError)` from the service entry points.
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (engine
//!   crashed, timed out, input was not a PDF) but its siblings in the same
//!   batch are fine. Stored inside [`crate::output::ConversionResult`] so a
//!   batch summary can enumerate every failure instead of aborting.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the marker-gateway library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::ConversionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Option errors ─────────────────────────────────────────────────────
    /// The raw option bag was not a JSON object.
    #[error("Invalid options: expected a JSON object, got {found}")]
    InvalidOptions { found: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The engine failed to initialise at startup; nothing is attempted.
    #[error("Conversion engine unavailable: {reason}\nCheck the startup logs and the engine installation.")]
    EngineUnavailable { reason: String },

    /// The engine executable could not be resolved on PATH.
    #[error("Engine executable '{program}' not found: {detail}\nInstall marker-pdf or pass --engine /path/to/marker_single.")]
    EngineNotFound { program: String, detail: String },

    /// A single-document conversion failed.
    ///
    /// Returned by [`crate::output::ConversionResult::into_result`] when the
    /// caller wants a failed conversion as an error.
    #[error("Conversion of '{document}' failed: {source}")]
    ConversionFailed {
        document: String,
        #[source]
        source: DocumentError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create a scratch directory or staging file.
    #[error("Failed to prepare working directory under '{path}': {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the batch archive.
    #[error("Failed to write archive '{path}': {detail}")]
    ArchiveFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
///
/// Stored alongside [`crate::output::ConversionResult`] when a document
/// fails. The surrounding batch continues with the next document.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// An in-memory document had zero bytes.
    #[error("No content provided")]
    NoContent,

    /// The input path does not exist or is unreadable.
    #[error("Input file not found: '{path}'")]
    NotFound { path: PathBuf },

    /// The input does not start with the `%PDF` magic.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The engine process exited unsuccessfully.
    #[error("Engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },

    /// The engine process exceeded its wall-clock budget and was killed.
    #[error("Engine timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The engine reported success but produced no primary output.
    #[error("Engine produced no {format} output in '{dir}'")]
    MissingOutput { dir: PathBuf, format: String },

    /// File-system failure while staging input or reading output.
    #[error("I/O error: {0}")]
    Io(String),

    /// The conversion task itself failed (panic, cancelled task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for DocumentError {
    fn from(e: std::io::Error) -> Self {
        DocumentError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_unavailable_display() {
        let e = ServiceError::EngineUnavailable {
            reason: "marker_single not on PATH".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("unavailable"), "got: {msg}");
        assert!(msg.contains("marker_single"), "got: {msg}");
    }

    #[test]
    fn conversion_failed_carries_document_error() {
        let e = ServiceError::ConversionFailed {
            document: "report.pdf".into(),
            source: DocumentError::Timeout { secs: 600 },
        };
        let msg = e.to_string();
        assert!(msg.contains("report.pdf"));
        assert!(msg.contains("600s"));
    }

    #[test]
    fn no_content_message_is_stable() {
        assert_eq!(DocumentError::NoContent.to_string(), "No content provided");
    }

    #[test]
    fn io_errors_become_document_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: DocumentError = io.into();
        assert!(matches!(e, DocumentError::Io(ref m) if m.contains("denied")));
    }

    #[test]
    fn document_error_serialises() {
        let e = DocumentError::EngineFailed {
            status: "exit status: 1".into(),
            stderr: "CUDA out of memory".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("CUDA out of memory"));
    }
}
