//! Output Collector: classify the files a conversion left behind.
//!
//! Three independent projections of one working directory:
//!
//! * **output**: every regular file except dotfiles and `*.tmp`
//! * **debug**: files under one of [`DEBUG_DIR_NAMES`], plus this document's
//!   files from the legacy debug location
//! * **images**: files with a raster-image extension
//!
//! The sets may overlap; an extracted figure is both an output and an image.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Debug sub-directories the engine may create inside a working directory.
pub const DEBUG_DIR_NAMES: &[&str] = &["debug_data", "debug_images", "layout_images", "pdf_images"];

/// Raster-image extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];

const TEMP_SUFFIX: &str = ".tmp";

/// Classified files of one working directory. Paths are absolute when the
/// working directory was given as an absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedFiles {
    pub output: Vec<PathBuf>,
    pub debug: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
}

impl CollectedFiles {
    pub fn is_empty(&self) -> bool {
        self.output.is_empty() && self.debug.is_empty() && self.images.is_empty()
    }
}

/// Walk `working_dir` and classify its files.
///
/// From `legacy_debug_dir`, only files belonging to `document_stem` are
/// merged: everything under `<legacy>/<stem>/`, and top-level files named
/// `<stem>.*` or `<stem>_*`.
///
/// A missing directory yields three empty sets. Results are sorted by path,
/// so two calls on an unchanged directory return identical sets.
pub fn collect(
    working_dir: &Path,
    document_stem: &str,
    legacy_debug_dir: Option<&Path>,
) -> CollectedFiles {
    let mut files = CollectedFiles::default();

    for path in regular_files(working_dir) {
        let Ok(rel) = path.strip_prefix(working_dir) else {
            continue;
        };
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        if is_image(&path) {
            files.images.push(path.clone());
        }
        if in_debug_dir(rel) {
            files.debug.push(path.clone());
        }
        files.output.push(path);
    }

    if let Some(legacy) = legacy_debug_dir.filter(|_| !document_stem.is_empty()) {
        // The legacy location is shared by every conversion; it only ever
        // adds to the debug set.
        let before = files.debug.len();
        files.debug.extend(regular_files(legacy).filter(|p| belongs_to(p, legacy, document_stem)));
        if files.debug.len() > before {
            debug!(
                "Merged {} legacy debug files from {}",
                files.debug.len() - before,
                legacy.display()
            );
        }
    }

    debug!(
        "Collected {} output, {} debug, {} image files from {}",
        files.output.len(),
        files.debug.len(),
        files.images.len(),
        working_dir.display()
    );
    files
}

fn regular_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn belongs_to(path: &Path, legacy: &Path, stem: &str) -> bool {
    let Ok(rel) = path.strip_prefix(legacy) else {
        return false;
    };
    let mut parts = rel.components();
    let Some(first) = parts.next() else {
        return false;
    };
    let first = first.as_os_str().to_string_lossy();
    if parts.next().is_some() {
        return first == stem;
    }
    first
        .strip_prefix(stem)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('_'))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| i.eq_ignore_ascii_case(ext)))
}

fn in_debug_dir(rel: &Path) -> bool {
    // Only directory components count; a file named `debug_data` does not.
    let mut dirs = rel.components();
    dirs.next_back();
    dirs.any(|c| {
        let c = c.as_os_str().to_string_lossy();
        DEBUG_DIR_NAMES.contains(&c.as_ref())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn missing_directory_is_empty() {
        let files = collect(Path::new("/nonexistent/marker/work"), "paper", None);
        assert!(files.is_empty());
    }

    #[test]
    fn classifies_output_debug_and_images() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let md = touch(root, "paper/paper.md");
        let fig = touch(root, "paper/_page_0_Figure_1.JPEG");
        let dbg = touch(root, "debug_data/blocks.json");
        let layout = touch(root, "layout_images/page_0.png");
        touch(root, ".engine_config.json");
        touch(root, "paper/partial.md.tmp");

        let files = collect(root, "paper", None);
        assert_eq!(files.output.len(), 4);
        assert!(files.output.contains(&md));
        assert!(files.output.contains(&fig));
        assert_eq!(files.debug, vec![dbg, layout.clone()]);
        assert_eq!(files.images.len(), 2);
        assert!(files.images.contains(&fig));
        assert!(files.images.contains(&layout));
    }

    #[test]
    fn debug_name_on_a_file_does_not_count() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "debug_data");
        let files = collect(dir.path(), "doc", None);
        assert_eq!(files.output.len(), 1);
        assert!(files.debug.is_empty());
    }

    #[test]
    fn legacy_debug_dir_is_merged() {
        let work = TempDir::new().unwrap();
        let legacy = TempDir::new().unwrap();
        touch(work.path(), "doc.md");
        let old = touch(legacy.path(), "doc/layout.json");

        let files = collect(work.path(), "doc", Some(legacy.path()));
        assert_eq!(files.debug, vec![old]);
        assert_eq!(files.output.len(), 1);

        let missing = collect(work.path(), "doc", Some(Path::new("/nonexistent/debug_data")));
        assert!(missing.debug.is_empty());
    }

    #[test]
    fn legacy_dumps_stay_with_their_document() {
        let legacy = TempDir::new().unwrap();
        let paper_dir = touch(legacy.path(), "paper/blocks.json");
        let paper_top = touch(legacy.path(), "paper_layout.json");
        let other_dir = touch(legacy.path(), "other_doc/blocks.json");
        let other_top = touch(legacy.path(), "other_doc.json");
        // shares a prefix with "paper" but is a different document
        touch(legacy.path(), "paperback/blocks.json");
        touch(legacy.path(), "paperback.json");

        let paper_wd = TempDir::new().unwrap();
        let paper = collect(paper_wd.path(), "paper", Some(legacy.path()));
        assert_eq!(paper.debug, vec![paper_dir, paper_top]);

        let other_wd = TempDir::new().unwrap();
        let other = collect(other_wd.path(), "other_doc", Some(legacy.path()));
        assert_eq!(other.debug, vec![other_dir, other_top]);

        let anonymous = collect(other_wd.path(), "", Some(legacy.path()));
        assert!(anonymous.debug.is_empty());
    }

    #[test]
    fn repeated_collection_is_stable() {
        let dir = TempDir::new().unwrap();
        for rel in ["b.md", "a/x.png", "a/y.html", "pdf_images/p1.png"] {
            touch(dir.path(), rel);
        }
        assert_eq!(collect(dir.path(), "b", None), collect(dir.path(), "b", None));
    }
}
