//! Work-item catalog: source video discovery
//!
//! Enumerates one work item per source video under a root path (or a single
//! file), in a stable sorted order so item identity is reproducible across
//! runs. Phase-completion status is derived from the checkpoint store, not
//! stored here.

use crate::layout::WORK_DIR_NAME;
use crate::models::WorkItem;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Accepted source video extensions (lowercase)
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "mov", "avi", "mkv", "mpg", "mpeg", "m4v", "mts"];

/// Catalog scan errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// No video files found under the path
    #[error("No video files found under: {0}")]
    Empty(PathBuf),

    /// General I/O error during traversal
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source video catalog
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Catalog { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate work items under the root, sorted by path.
    ///
    /// Skips macOS resource forks (`._*`), hidden directories, and any prior
    /// run's work directory. Duplicate file names map to duplicate item ids,
    /// which would alias checkpoint records, so later duplicates are dropped
    /// with a warning.
    pub fn scan(&self) -> Result<Vec<WorkItem>, CatalogError> {
        if !self.root.exists() {
            return Err(CatalogError::PathNotFound(self.root.clone()));
        }

        if self.root.is_file() {
            return if is_video(&self.root) {
                Ok(vec![WorkItem::new(self.root.clone())])
            } else {
                Err(CatalogError::Empty(self.root.clone()))
            };
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e))
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_video(p) && !is_resource_fork(p))
            .collect();
        paths.sort();

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let item = WorkItem::new(path);
            if !seen.insert(item.id.clone()) {
                warn!(item = %item.id, path = %item.path.display(), "Duplicate file name, skipping");
                continue;
            }
            items.push(item);
        }

        if items.is_empty() {
            return Err(CatalogError::Empty(self.root.clone()));
        }

        debug!(count = items.len(), root = %self.root.display(), "Catalog scan complete");
        Ok(items)
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_resource_fork(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("._"))
        .unwrap_or(false)
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    // Depth 0 is the scan root itself; a dot-named root is still a valid
    // place to scan from
    if entry.depth() == 0 {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|n| n == WORK_DIR_NAME || n.starts_with('.'))
        .unwrap_or(false)
}
