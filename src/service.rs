//! The service facade.
//!
//! [`MarkerService`] owns the engine handle for its whole lifetime and is the
//! entry point front ends call: single-document conversion, batch conversion
//! into an archive, the JSON batch report, and the status query.
//!
//! Engine invocations are gated by a semaphore sized by
//! [`ServiceConfig::max_concurrent_conversions`] (default 1), so concurrent
//! callers queue instead of running the engine side by side.

use crate::config::ServiceConfig;
use crate::engine::{ConversionEngine, EngineHandle, ExtractedText, MarkerCliEngine};
use crate::error::{DocumentError, ServiceError};
use crate::options::EngineConfig;
use crate::output::{BatchOutcome, BatchReport, ConversionResult};
use crate::pipeline::archive::{archive_results, cleanup_working_dirs, BatchOptions};
use crate::pipeline::invoke::{convert_one, ConversionRequest, DocumentInput};
use crate::pipeline::normalize::normalize;
use crate::status::{self, ServiceStatus};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Conversion service bound to one engine instance.
///
/// Cheap to clone; clones share the engine handle and the semaphore.
#[derive(Debug, Clone)]
pub struct MarkerService {
    config: ServiceConfig,
    handle: EngineHandle,
    permits: Arc<Semaphore>,
}

impl MarkerService {
    /// Initialise the marker CLI engine described by `config`.
    ///
    /// Never fails: an initialisation error is kept on the handle, reported
    /// by [`status`](Self::status), and makes every conversion fail fast.
    pub fn new(config: ServiceConfig) -> Self {
        let handle = EngineHandle::initialize(|| MarkerCliEngine::initialize(&config));
        Self::with_handle(config, handle)
    }

    /// Use an already constructed engine.
    pub fn with_engine(config: ServiceConfig, engine: Arc<dyn ConversionEngine>) -> Self {
        Self::with_handle(config, EngineHandle::ready(engine))
    }

    pub fn with_handle(config: ServiceConfig, handle: EngineHandle) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_conversions));
        Self {
            config,
            handle,
            permits,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn status(&self) -> ServiceStatus {
        status::status(&self.handle)
    }

    /// Convert one document.
    ///
    /// On success the caller owns the result's working directory. A failed
    /// conversion is returned as [`ServiceError::ConversionFailed`] after its
    /// working directory has been removed.
    pub async fn convert(
        &self,
        document: impl Into<DocumentInput>,
        raw_options: &Value,
    ) -> Result<ConversionResult, ServiceError> {
        let engine = self.handle.engine()?;
        let config = normalize(raw_options)?;
        let result = self.run_one(engine, document.into(), config).await?;
        if !result.success() {
            result.cleanup();
        }
        result.into_result()
    }

    /// Convert one document and return only its text. Nothing is left on
    /// disk.
    pub async fn convert_text(
        &self,
        document: impl Into<DocumentInput>,
        raw_options: &Value,
    ) -> Result<ExtractedText, ServiceError> {
        let result = self.convert(document, raw_options).await?;
        result.cleanup();
        Ok(ExtractedText {
            text: result.text,
            format: result.format,
            metadata: result.metadata,
        })
    }

    /// Convert `documents` in order and package them into one archive.
    ///
    /// Per-document failures are recorded, never raised. The working
    /// directories stay on disk until [`BatchOutcome::cleanup`]; if writing
    /// the archive fails they are removed before the error is returned.
    pub async fn convert_batch(
        &self,
        documents: Vec<DocumentInput>,
        raw_options: &Value,
        options: &BatchOptions,
    ) -> Result<BatchOutcome, ServiceError> {
        let engine = self.handle.engine()?;
        let config = normalize(raw_options)?;
        let results = self.run_batch(engine, documents, &config, options).await;

        match archive_results(&results, options, &self.config).await {
            Ok(archive) => Ok(BatchOutcome { archive, results }),
            Err(e) => {
                cleanup_working_dirs(&results);
                Err(e)
            }
        }
    }

    /// Convert `documents` in order and return the JSON-friendly report.
    /// Working directories are removed before returning.
    pub async fn convert_batch_report(
        &self,
        documents: Vec<DocumentInput>,
        raw_options: &Value,
    ) -> Result<BatchReport, ServiceError> {
        let engine = self.handle.engine()?;
        let config = normalize(raw_options)?;
        let results = self
            .run_batch(engine, documents, &config, &BatchOptions::default())
            .await;
        let report = BatchReport::from_results(&results);
        cleanup_working_dirs(&results);
        Ok(report)
    }

    async fn run_one(
        &self,
        engine: Arc<dyn ConversionEngine>,
        document: DocumentInput,
        config: EngineConfig,
    ) -> Result<ConversionResult, ServiceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ServiceError::Internal(format!("engine semaphore closed: {e}")))?;
        convert_one(engine, ConversionRequest::new(document, config), &self.config).await
    }

    async fn run_batch(
        &self,
        engine: Arc<dyn ConversionEngine>,
        documents: Vec<DocumentInput>,
        config: &EngineConfig,
        options: &BatchOptions,
    ) -> Vec<ConversionResult> {
        let total = documents.len();
        let start = Instant::now();
        info!("Starting batch of {} documents", total);
        let cb = options.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_batch_start(total);
        }

        let mut results = Vec::with_capacity(total);
        for (i, document) in documents.into_iter().enumerate() {
            let index = i + 1;
            let name = document.name();
            if let Some(cb) = cb {
                cb.on_document_start(index, total, &name);
            }

            let result = match self
                .run_one(Arc::clone(&engine), document, config.clone())
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("Invoker failed for '{}': {}", name, e);
                    let error = DocumentError::Internal(e.to_string());
                    ConversionResult::failed(name.clone(), error, None)
                }
            };

            if let Some(cb) = cb {
                if result.success() {
                    cb.on_document_complete(index, total, &name, result.text.len());
                } else {
                    cb.on_document_error(index, total, &name, &result.error_message());
                }
            }
            results.push(result);
        }

        let successful = results.iter().filter(|r| r.success()).count();
        info!(
            "Batch finished in {}ms: {}/{} succeeded",
            start.elapsed().as_millis(),
            successful,
            total
        );
        if let Some(cb) = cb {
            cb.on_batch_complete(total, successful);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RenderedDocument;
    use crate::status::StatusKind;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Tracks how many conversions run at once.
    struct CountingEngine {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConversionEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }

        fn convert(
            &self,
            _document: &Path,
            output_dir: &Path,
            config: &EngineConfig,
        ) -> Result<RenderedDocument, DocumentError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(30));
            self.active.fetch_sub(1, Ordering::SeqCst);

            let primary = output_dir.join("doc.md");
            std::fs::write(&primary, "text")?;
            Ok(RenderedDocument {
                output_dir: output_dir.to_path_buf(),
                primary,
                format: config.output_format,
                metadata: Value::Null,
            })
        }
    }

    fn config(root: &Path) -> ServiceConfig {
        ServiceConfig::builder()
            .work_root(root.join("work"))
            .archive_dir(root.join("archives"))
            .legacy_debug_dir(None)
            .build()
            .unwrap()
    }

    fn pdf(name: &str) -> DocumentInput {
        DocumentInput::from_bytes(name, b"%PDF-1.4\n".to_vec())
    }

    #[tokio::test]
    async fn failed_engine_fails_fast() {
        let root = TempDir::new().unwrap();
        let service =
            MarkerService::with_handle(config(root.path()), EngineHandle::failed("no GPU"));
        assert_eq!(service.status().status, StatusKind::Failed);

        let err = service
            .convert_batch(vec![pdf("a.pdf")], &json!({}), &BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EngineUnavailable { .. }));
        // nothing was attempted
        assert!(!root.path().join("work").exists());
    }

    #[tokio::test]
    async fn malformed_options_are_rejected_before_conversion() {
        let root = TempDir::new().unwrap();
        let engine = Arc::new(CountingEngine {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let service = MarkerService::with_engine(config(root.path()), engine.clone());
        let err = service.convert(pdf("a.pdf"), &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOptions { .. }));
        assert_eq!(engine.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_are_serialised() {
        let root = TempDir::new().unwrap();
        let engine = Arc::new(CountingEngine {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let service = MarkerService::with_engine(config(root.path()), engine.clone());

        let mut tasks = Vec::new();
        for i in 0..4 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service.convert_text(pdf(&format!("{i}.pdf")), &json!({})).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().text, "text");
        }
        assert_eq!(engine.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_single_conversion_propagates_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let engine = Arc::new(CountingEngine {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let service = MarkerService::with_engine(config(root.path()), engine);
        let err = service
            .convert(DocumentInput::from_bytes("x.pdf", b"GIF89a".to_vec()), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::ConversionFailed { source: DocumentError::NotAPdf { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn report_counts_and_removes_working_dirs() {
        let root = TempDir::new().unwrap();
        let engine = Arc::new(CountingEngine {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let service = MarkerService::with_engine(config(root.path()), engine);
        let report = service
            .convert_batch_report(
                vec![pdf("a.pdf"), DocumentInput::from_bytes("empty.pdf", Vec::new())],
                &json!({}),
            )
            .await
            .unwrap();
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.successful, 1);
        assert_eq!(report.results[1].error.as_deref(), Some("No content provided"));

        let leftover = std::fs::read_dir(root.path().join("work")).unwrap().count();
        assert_eq!(leftover, 0);
    }
}
