//! Conversion Invoker: run the engine once for one document.
//!
//! The engine call is synchronous and takes tens of seconds to minutes, so it
//! runs on Tokio's blocking pool; the calling task is suspended, the runtime
//! keeps accepting other work. Each document gets a fresh working directory
//! that outlives this call: it is collected, archived, and removed later by
//! an explicit cleanup step.
//!
//! Per-document problems (bad input, engine crash, timeout) are recorded on
//! the returned [`ConversionResult`]. Only failing to allocate the working
//! directory is returned as `Err`. There are no retries.

use crate::config::ServiceConfig;
use crate::engine::{ConversionEngine, ExtractedText};
use crate::error::{DocumentError, ServiceError};
use crate::options::EngineConfig;
use crate::output::ConversionResult;
use crate::pipeline::collect::{collect, CollectedFiles};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

const PDF_MAGIC: &[u8] = b"%PDF";

/// A document to convert: a file on disk or an in-memory upload.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl DocumentInput {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        DocumentInput::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// File name used in results and archive entries.
    pub fn name(&self) -> String {
        match self {
            DocumentInput::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.to_string_lossy().into_owned()),
            DocumentInput::Bytes { name, .. } => sanitize_name(name),
        }
    }
}

impl From<PathBuf> for DocumentInput {
    fn from(p: PathBuf) -> Self {
        DocumentInput::Path(p)
    }
}

impl From<&Path> for DocumentInput {
    fn from(p: &Path) -> Self {
        DocumentInput::Path(p.to_path_buf())
    }
}

/// One document plus its normalised configuration. Consumed by
/// [`convert_one`].
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub document: DocumentInput,
    pub config: EngineConfig,
}

impl ConversionRequest {
    pub fn new(document: impl Into<DocumentInput>, config: EngineConfig) -> Self {
        Self {
            document: document.into(),
            config,
        }
    }
}

/// Convert one document into a fresh working directory under
/// `settings.work_root`.
pub async fn convert_one(
    engine: Arc<dyn ConversionEngine>,
    request: ConversionRequest,
    settings: &ServiceConfig,
) -> Result<ConversionResult, ServiceError> {
    let ConversionRequest { document, config } = request;
    let name = document.name();
    let start = Instant::now();

    if let Err(e) = validate_input(&document).await {
        warn!("Rejected '{}': {}", name, e);
        return Ok(ConversionResult::failed(name, e, None));
    }

    let working_dir = allocate_working_dir(&settings.work_root, &name)?;
    debug!("Working directory for '{}': {}", name, working_dir.display());

    // Uploaded bytes are staged under their own name so the engine derives
    // the right output stem. The staging dir is dropped when we return.
    let staging = match &document {
        DocumentInput::Bytes { data, .. } => match stage_bytes(&settings.work_root, &name, data) {
            Ok(staged) => Some(staged),
            Err(e) => {
                warn!("Failed to stage '{}': {}", name, e);
                return Ok(ConversionResult::failed(name, e, Some(working_dir)));
            }
        },
        DocumentInput::Path(_) => None,
    };
    let source = match (&document, &staging) {
        (DocumentInput::Path(p), _) => p.clone(),
        (_, Some((_, path))) => path.clone(),
        (DocumentInput::Bytes { .. }, None) => {
            return Err(ServiceError::Internal("staged input missing".into()))
        }
    };

    info!("Converting '{}' ({} output)", name, config.output_format);
    let wd = working_dir.clone();
    let legacy = settings.legacy_debug_dir.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let rendered = engine.convert(&source, &wd, &config)?;
        let text = engine.extract_text(&rendered)?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let files = collect(&wd, &stem, legacy.as_deref());
        Ok::<(ExtractedText, CollectedFiles), DocumentError>((text, files))
    })
    .await
    .unwrap_or_else(|e| Err(DocumentError::Internal(format!("conversion task failed: {e}"))));
    drop(staging);

    let duration_ms = start.elapsed().as_millis() as u64;
    let result = match outcome {
        Ok((text, files)) => {
            info!(
                "Converted '{}' in {}ms: {} bytes, {} output files, {} images",
                name,
                duration_ms,
                text.text.len(),
                files.output.len(),
                files.images.len()
            );
            ConversionResult {
                document_name: name,
                text: text.text,
                format: text.format,
                metadata: text.metadata,
                output_files: files.output,
                debug_files: files.debug,
                image_files: files.images,
                error: None,
                working_dir: Some(working_dir),
                duration_ms,
            }
        }
        Err(e) => {
            warn!("Conversion of '{}' failed after {}ms: {}", name, duration_ms, e);
            ConversionResult {
                duration_ms,
                ..ConversionResult::failed(name, e, Some(working_dir))
            }
        }
    };
    Ok(result)
}

async fn validate_input(document: &DocumentInput) -> Result<(), DocumentError> {
    match document {
        DocumentInput::Bytes { data, .. } => {
            if data.is_empty() {
                return Err(DocumentError::NoContent);
            }
            check_magic(data)
        }
        DocumentInput::Path(path) => {
            let mut file = tokio::fs::File::open(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DocumentError::NotFound { path: path.clone() }
                } else {
                    DocumentError::from(e)
                }
            })?;
            let mut header = Vec::with_capacity(PDF_MAGIC.len());
            (&mut file)
                .take(PDF_MAGIC.len() as u64)
                .read_to_end(&mut header)
                .await?;
            if header.is_empty() {
                return Err(DocumentError::NoContent);
            }
            check_magic(&header)
        }
    }
}

fn check_magic(bytes: &[u8]) -> Result<(), DocumentError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(DocumentError::NotAPdf {
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        })
    }
}

fn allocate_working_dir(work_root: &Path, name: &str) -> Result<PathBuf, ServiceError> {
    let wrap = |source: std::io::Error| ServiceError::WorkingDir {
        path: work_root.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(work_root).map_err(wrap)?;
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = tempfile::Builder::new()
        .prefix(&format!("marker_output_{stem}_"))
        .tempdir_in(work_root)
        .map_err(wrap)?;
    Ok(dir.keep())
}

fn stage_bytes(
    work_root: &Path,
    name: &str,
    data: &[u8],
) -> Result<(tempfile::TempDir, PathBuf), DocumentError> {
    let dir = tempfile::Builder::new()
        .prefix("marker_input_")
        .tempdir_in(work_root)?;
    let path = dir.path().join(name);
    std::fs::write(&path, data)?;
    Ok((dir, path))
}

/// Strip directory components from an uploaded name.
fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "document.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RenderedDocument;
    use crate::options::OutputFormat;
    use tempfile::TempDir;

    /// Writes a Markdown file and one image, or fails on demand.
    struct ScriptedEngine {
        fail: bool,
    }

    impl ConversionEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn convert(
            &self,
            document: &Path,
            output_dir: &Path,
            config: &EngineConfig,
        ) -> Result<RenderedDocument, DocumentError> {
            if self.fail {
                return Err(DocumentError::EngineFailed {
                    status: "exit status: 1".into(),
                    stderr: "RuntimeError: boom".into(),
                });
            }
            let stem = document.file_stem().unwrap().to_string_lossy().into_owned();
            let dir = output_dir.join(&stem);
            std::fs::create_dir_all(&dir)?;
            let primary = dir.join(format!("{stem}.md"));
            std::fs::write(&primary, format!("# {stem}\n"))?;
            std::fs::write(dir.join("_page_0_Picture_1.png"), b"png")?;
            Ok(RenderedDocument {
                output_dir: output_dir.to_path_buf(),
                primary,
                format: config.output_format,
                metadata: serde_json::json!({"pages": 1}),
            })
        }
    }

    fn settings(root: &Path) -> ServiceConfig {
        ServiceConfig::builder()
            .work_root(root)
            .legacy_debug_dir(None)
            .build()
            .unwrap()
    }

    fn pdf_bytes() -> Vec<u8> {
        b"%PDF-1.7\n%fake\n".to_vec()
    }

    #[tokio::test]
    async fn bytes_input_is_converted_and_collected() {
        let root = TempDir::new().unwrap();
        let request = ConversionRequest::new(
            DocumentInput::from_bytes("paper.pdf", pdf_bytes()),
            EngineConfig::default(),
        );
        let engine = Arc::new(ScriptedEngine { fail: false });
        let result = convert_one(engine, request, &settings(root.path()))
            .await
            .unwrap();

        assert!(result.success(), "{}", result.error_message());
        assert_eq!(result.document_name, "paper.pdf");
        assert_eq!(result.text, "# paper\n");
        assert_eq!(result.format, OutputFormat::Markdown);
        assert_eq!(result.metadata["pages"], 1);
        assert_eq!(result.output_files.len(), 2);
        assert_eq!(result.image_files.len(), 1);

        let wd = result.working_dir.clone().unwrap();
        assert!(wd.starts_with(root.path()));
        assert!(wd
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("marker_output_paper_"));
        // staging directory is gone, working directory stays
        assert!(wd.exists());
        let leftovers: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("marker_input_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn engine_failure_is_recorded_not_raised() {
        let root = TempDir::new().unwrap();
        let request = ConversionRequest::new(
            DocumentInput::from_bytes("bad.pdf", pdf_bytes()),
            EngineConfig::default(),
        );
        let engine = Arc::new(ScriptedEngine { fail: true });
        let result = convert_one(engine, request, &settings(root.path()))
            .await
            .unwrap();
        assert!(!result.success());
        assert!(result.error_message().contains("boom"));
        assert!(result.text.is_empty());
        assert!(result.working_dir.unwrap().exists());
    }

    #[tokio::test]
    async fn empty_bytes_are_no_content() {
        let root = TempDir::new().unwrap();
        let request = ConversionRequest::new(
            DocumentInput::from_bytes("empty.pdf", Vec::new()),
            EngineConfig::default(),
        );
        let engine = Arc::new(ScriptedEngine { fail: false });
        let result = convert_one(engine, request, &settings(root.path()))
            .await
            .unwrap();
        assert_eq!(result.error, Some(DocumentError::NoContent));
        assert!(result.working_dir.is_none());
    }

    #[tokio::test]
    async fn missing_path_and_wrong_magic_are_rejected() {
        let root = TempDir::new().unwrap();
        let engine: Arc<dyn ConversionEngine> = Arc::new(ScriptedEngine { fail: false });

        let missing = root.path().join("nope.pdf");
        let result = convert_one(
            engine.clone(),
            ConversionRequest::new(missing.clone(), EngineConfig::default()),
            &settings(root.path()),
        )
        .await
        .unwrap();
        assert_eq!(result.error, Some(DocumentError::NotFound { path: missing }));

        let text = root.path().join("notes.pdf");
        std::fs::write(&text, "hello").unwrap();
        let result = convert_one(
            engine,
            ConversionRequest::new(text, EngineConfig::default()),
            &settings(root.path()),
        )
        .await
        .unwrap();
        assert!(matches!(
            result.error,
            Some(DocumentError::NotAPdf { ref magic }) if magic == b"hell"
        ));
    }

    #[test]
    fn uploaded_names_lose_directories() {
        let input = DocumentInput::from_bytes("../../etc/passwd.pdf", pdf_bytes());
        assert_eq!(input.name(), "passwd.pdf");
        assert_eq!(sanitize_name(""), "document.pdf");
        assert_eq!(DocumentInput::from(PathBuf::from("/a/b/c.pdf")).name(), "c.pdf");
    }
}
