//! Batch Archiver: package converted documents into one zip plus a combined
//! Markdown document.
//!
//! ## Archive layout
//!
//! ```text
//! 00_OVERVIEW.md                      counts and per-document status
//! 01_<name>/converted_text.md         primary text (.html / .json per format)
//! 01_<name>/output/<rel path>         every output-set file
//! 01_<name>/debug/<rel path>          debug-set files, if include_debug
//! 01_<name>/images/<rel path>         image-set files, if include_images
//! 03_<name>/...                       NN is the 1-based input position
//! ```
//!
//! Failed documents get no directory but are listed in the overview. Entries
//! are deflate-compressed. The entry list is planned up front by
//! [`plan_entries`], then written on the blocking pool.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::output::{BatchArchive, BatchSummary, ConversionResult};
use crate::pipeline::normalize::Reader;
use crate::progress::ProgressCallback;
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the overview entry; the `00_` prefix sorts it first.
pub const OVERVIEW_ENTRY: &str = "00_OVERVIEW.md";

const PRIMARY_TEXT_STEM: &str = "converted_text";
const LEGACY_DEBUG_PREFIX: &str = "legacy";

/// What to include in a batch archive.
#[derive(Clone)]
pub struct BatchOptions {
    /// Mirror debug-set files under `debug/`. Default: false.
    pub include_debug: bool,
    /// Mirror image-set files under `images/`. Default: true.
    pub include_images: bool,
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            include_debug: false,
            include_images: true,
            progress_callback: None,
        }
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("include_debug", &self.include_debug)
            .field("include_images", &self.include_images)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchOptions {
    /// Read `include_debug_in_zip` / `include_images_in_zip` from a raw
    /// option bag, with the same coercion rules as the normaliser.
    pub fn from_options(raw: &Value) -> Self {
        let mut opts = Self::default();
        if let Value::Object(map) = raw {
            let mut r = Reader::new(map);
            if let Some(v) = r.boolean("include_debug_in_zip") {
                opts.include_debug = v;
            }
            if let Some(v) = r.boolean("include_images_in_zip") {
                opts.include_images = v;
            }
        }
        opts
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

/// One planned archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    Text { name: String, content: String },
    File { name: String, source: PathBuf },
}

impl ArchiveEntry {
    pub fn name(&self) -> &str {
        match self {
            ArchiveEntry::Text { name, .. } | ArchiveEntry::File { name, .. } => name,
        }
    }
}

/// Plan every entry of the archive, overview last.
pub fn plan_entries(
    results: &[ConversionResult],
    include_debug: bool,
    include_images: bool,
    legacy_debug_dir: Option<&Path>,
) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();

    for (i, result) in results.iter().enumerate() {
        if !result.success() {
            continue;
        }
        let prefix = format!("{:02}_{}", i + 1, result.base_name());
        let root = result.working_dir.as_deref();

        entries.push(ArchiveEntry::Text {
            name: format!("{prefix}/{PRIMARY_TEXT_STEM}.{}", result.format.extension()),
            content: result.text.clone(),
        });

        let mut mirror = |section: &str, files: &[PathBuf]| {
            for source in files {
                let rel = relative_entry_path(source, root, legacy_debug_dir);
                entries.push(ArchiveEntry::File {
                    name: format!("{prefix}/{section}/{rel}"),
                    source: source.clone(),
                });
            }
        };
        mirror("output", &result.output_files);
        if include_debug {
            mirror("debug", &result.debug_files);
        }
        if include_images {
            mirror("images", &result.image_files);
        }
    }

    entries.push(ArchiveEntry::Text {
        name: OVERVIEW_ENTRY.to_string(),
        content: overview_markdown(results),
    });
    entries
}

/// Write the archive for `results` into `settings.archive_dir` and build the
/// combined Markdown.
pub async fn archive_results(
    results: &[ConversionResult],
    options: &BatchOptions,
    settings: &ServiceConfig,
) -> Result<BatchArchive, ServiceError> {
    let entries = plan_entries(
        results,
        options.include_debug,
        options.include_images,
        settings.legacy_debug_dir.as_deref(),
    );
    let entry_count = entries.len();
    let archive_dir = settings.archive_dir.clone();

    let archive_path = tokio::task::spawn_blocking(move || write_archive(&archive_dir, entries))
        .await
        .map_err(|e| ServiceError::Internal(format!("archive task failed: {e}")))??;

    let summary = BatchSummary::from_results(results);
    info!(
        "Archived {} documents ({} ok, {} failed, {} entries) to {}",
        summary.total,
        summary.successful,
        summary.failed,
        entry_count,
        archive_path.display()
    );

    Ok(BatchArchive {
        archive_path,
        combined_text: combined_text(results),
        summary,
    })
}

fn write_archive(archive_dir: &Path, entries: Vec<ArchiveEntry>) -> Result<PathBuf, ServiceError> {
    let fail = |path: &Path, detail: String| ServiceError::ArchiveFailed {
        path: path.to_path_buf(),
        detail,
    };

    std::fs::create_dir_all(archive_dir).map_err(|e| fail(archive_dir, e.to_string()))?;
    let (file, path) = tempfile::Builder::new()
        .prefix("marker_batch_")
        .suffix(".zip")
        .tempfile_in(archive_dir)
        .and_then(|f| f.keep().map_err(|e| e.error))
        .map_err(|e| fail(archive_dir, e.to_string()))?;

    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        match entry {
            ArchiveEntry::Text { name, content } => {
                zip.start_file(name.as_str(), options)
                    .map_err(|e| fail(&path, format!("{name}: {e}")))?;
                zip.write_all(content.as_bytes())
                    .map_err(|e| fail(&path, format!("{name}: {e}")))?;
            }
            ArchiveEntry::File { name, source } => {
                // Files can vanish between collection and archiving.
                let mut src = match File::open(&source) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("Skipping {}: {}", source.display(), e);
                        continue;
                    }
                };
                zip.start_file(name.as_str(), options)
                    .map_err(|e| fail(&path, format!("{name}: {e}")))?;
                std::io::copy(&mut src, &mut zip)
                    .map_err(|e| fail(&path, format!("{name}: {e}")))?;
            }
        }
    }

    zip.finish().map_err(|e| fail(&path, e.to_string()))?;
    debug!("Finished archive {}", path.display());
    Ok(path)
}

/// The `00_OVERVIEW.md` document.
pub fn overview_markdown(results: &[ConversionResult]) -> String {
    let summary = BatchSummary::from_results(results);
    let mut out = String::from("# PDF Conversion Overview\n\n");
    out.push_str(&format!("**Total documents:** {}\n", summary.total));
    out.push_str(&format!("**Successful:** {}\n", summary.successful));
    out.push_str(&format!("**Failed:** {}\n\n", summary.failed));

    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("## {}. {}\n\n", i + 1, r.document_name));
        if r.success() {
            out.push_str("**Status:** Converted\n");
            out.push_str(&format!("**Output files:** {}\n", r.output_files.len()));
            out.push_str(&format!("**Debug files:** {}\n", r.debug_files.len()));
            out.push_str(&format!("**Images:** {}\n", r.image_files.len()));
        } else {
            out.push_str("**Status:** Failed\n");
            out.push_str(&format!("**Error:** {}\n", r.error_message()));
        }
        out.push('\n');
    }
    out
}

/// Overview followed by every successful document's text, in input order.
pub fn combined_text(results: &[ConversionResult]) -> String {
    let mut out = overview_markdown(results);
    out.push_str("\n\n# Converted Texts\n\n");
    for (i, r) in results.iter().enumerate().filter(|(_, r)| r.success()) {
        out.push_str(&format!("## {}. {}\n\n", i + 1, r.document_name));
        out.push_str(&r.text);
        out.push_str("\n\n---\n\n");
    }
    out
}

/// Remove the working directory of every result. Problems are logged only.
pub fn cleanup_working_dirs(results: &[ConversionResult]) {
    for r in results {
        r.cleanup();
    }
}

/// Entry path of `file` relative to the working directory, using `/`.
fn relative_entry_path(file: &Path, working_dir: Option<&Path>, legacy: Option<&Path>) -> String {
    if let Some(rel) = working_dir.and_then(|wd| file.strip_prefix(wd).ok()) {
        return join_components(rel);
    }
    if let Some(rel) = legacy.and_then(|l| file.strip_prefix(l).ok()) {
        return format!("{LEGACY_DEBUG_PREFIX}/{}", join_components(rel));
    }
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn join_components(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
