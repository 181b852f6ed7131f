//! Artifact discovery and registration
//!
//! Convenience for the ingestion side: walk a directory, keep files whose
//! magic bytes identify an image, and register each as a work item.
//! Registration is idempotent on path, so re-ingesting a tree only adds
//! what is new.

use crate::db::work_items;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use vigil_common::Result;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

impl From<ScanError> for vigil_common::Error {
    fn from(err: ScanError) -> Self {
        vigil_common::Error::InvalidInput(err.to_string())
    }
}

/// Recursive image file finder
pub struct ArtifactScanner {
    ignore_patterns: Vec<String>,
    max_depth: Option<usize>,
}

impl ArtifactScanner {
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Image files under `root`, sorted by path
    pub fn scan(&self, root: &Path) -> std::result::Result<Vec<PathBuf>, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut symlink_visited = HashSet::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        let mut found = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if is_image_file(entry.path()) {
                        found.push(entry.path().to_path_buf());
                    } else {
                        debug!(path = %entry.path().display(), "Not an image, ignoring");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Error accessing entry: {}", e),
            }
        }

        found.sort();
        Ok(found)
    }

    fn should_process_entry(
        &self,
        entry: &DirEntry,
        symlink_visited: &mut HashSet<PathBuf>,
    ) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        let ignored = self.ignore_patterns.iter().any(|p| file_name.contains(p.as_str()));
        if entry.depth() > 0 && ignored {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    warn!(path = %entry.path().display(), "Symlink loop detected");
                    return false;
                }
            }
        }

        true
    }
}

impl Default for ArtifactScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Magic-byte check; unreadable files count as non-images
fn is_image_file(path: &Path) -> bool {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => kind.matcher_type() == infer::MatcherType::Image,
        Ok(None) => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read file header");
            false
        }
    }
}

/// Outcome of [`ingest_directory`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub discovered: usize,
    pub registered: usize,
    pub already_known: usize,
}

/// Register every image under `root` as a work item
///
/// `source_ref` is stored on newly created items only.
pub async fn ingest_directory(
    pool: &SqlitePool,
    root: &Path,
    source_ref: Option<&str>,
) -> Result<IngestSummary> {
    let root_owned = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || ArtifactScanner::new().scan(&root_owned))
        .await
        .map_err(|e| vigil_common::Error::Internal(format!("Scan task failed: {}", e)))??;

    let mut summary = IngestSummary {
        discovered: files.len(),
        ..Default::default()
    };

    for path in &files {
        let absolute = std::path::absolute(path)?;
        let (id, created) = work_items::register_work_item(pool, &absolute, source_ref).await?;
        if created {
            debug!(item_id = id, path = %absolute.display(), "Registered work item");
            summary.registered += 1;
        } else {
            summary.already_known += 1;
        }
    }

    info!(
        root = %root.display(),
        discovered = summary.discovered,
        registered = summary.registered,
        already_known = summary.already_known,
        "Ingest complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F', 0];

    #[test]
    fn test_scan_finds_images_by_content() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.png"), PNG_HEADER).unwrap();
        // Extension does not matter, content does
        fs::write(dir.path().join("nested/photo.bin"), JPEG_HEADER).unwrap();
        fs::write(dir.path().join("notes.png"), b"plain text, not an image").unwrap();

        let found = ArtifactScanner::new().scan(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "photo.bin"]);
    }

    #[test]
    fn test_scan_skips_ignored_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/x.png"), PNG_HEADER).unwrap();
        assert!(ArtifactScanner::new().scan(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_scan_rejects_bad_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.png");
        fs::write(&file, PNG_HEADER).unwrap();

        assert!(matches!(
            ArtifactScanner::new().scan(&dir.path().join("missing")),
            Err(ScanError::PathNotFound(_))
        ));
        assert!(matches!(ArtifactScanner::new().scan(&file), Err(ScanError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("vigil.db");
        let pool = vigil_common::db::init_database(&db_path).await.unwrap();

        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        fs::write(images.join("one.png"), PNG_HEADER).unwrap();
        fs::write(images.join("two.jpg"), JPEG_HEADER).unwrap();

        let first = ingest_directory(&pool, &images, Some("batch-1")).await.unwrap();
        assert_eq!(first.discovered, 2);
        assert_eq!(first.registered, 2);

        fs::write(images.join("three.png"), PNG_HEADER).unwrap();
        let second = ingest_directory(&pool, &images, None).await.unwrap();
        assert_eq!(second.discovered, 3);
        assert_eq!(second.registered, 1);
        assert_eq!(second.already_known, 2);
        assert_eq!(work_items::count_work_items(&pool).await.unwrap(), 3);
    }
}
