//! Progress-callback trait for per-document batch events.
//!
//! Attach an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::pipeline::archive::BatchOptions`] to receive events as a batch is
//! processed. The CLI renders them as an `indicatif` progress bar; a server
//! could forward them to a channel instead.
//!
//! # Example
//!
//! ```rust
//! use marker_gateway::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, name: &str, text_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {text_len} bytes");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the batch pipeline as it processes each document.
///
/// Documents are processed in input order, one at a time, so events for one
/// batch never interleave. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before a document is handed to the engine.
    ///
    /// # Arguments
    /// * `index` — 1-based position in the batch
    /// * `total` — documents in the batch
    /// * `name`  — document name
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document converted successfully.
    ///
    /// `text_len` is the byte length of the primary converted text.
    fn on_document_complete(&self, index: usize, total: usize, name: &str, text_len: usize) {
        let _ = (index, total, name, text_len);
    }

    /// Called when a document failed; `error` is the recorded message.
    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
