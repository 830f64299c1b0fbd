//! Work-directory layout for per-run artifacts
//!
//! Every artifact the pipeline produces lives under one work directory next
//! to the source footage. Paths are derived from the item's file stem so a
//! re-run finds (and reuses) earlier artifacts.

use std::path::{Path, PathBuf};

/// Name of the work directory created beside the scanned root
pub const WORK_DIR_NAME: &str = "tapedeck_output";

/// Checkpoint database file name within the work directory
pub const CHECKPOINT_DB: &str = "checkpoints.db";

/// Resolved artifact paths for one run
#[derive(Debug, Clone)]
pub struct WorkLayout {
    work_dir: PathBuf,
}

impl WorkLayout {
    /// Layout rooted beside the scan root: `<root>/tapedeck_output`, or
    /// `<parent>/tapedeck_output/<stem>` for a single-file source.
    pub fn for_source(source: &Path) -> WorkLayout {
        let work_dir = if source.is_file() {
            let base = source
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(WORK_DIR_NAME);
            match source.file_stem() {
                Some(stem) => base.join(stem),
                None => base,
            }
        } else {
            source.join(WORK_DIR_NAME)
        };
        WorkLayout { work_dir }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.work_dir.join(CHECKPOINT_DB)
    }

    pub fn proxies_dir(&self) -> PathBuf {
        self.work_dir.join("proxies")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.work_dir.join("chunks")
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.work_dir.join("samples")
    }

    /// Chunk manifest written by the proxy phase, read by analysis phases
    pub fn manifest_path(&self, stem: &str) -> PathBuf {
        self.proxies_dir().join(format!("{}.manifest.json", stem))
    }

    pub fn prescan_path(&self, stem: &str) -> PathBuf {
        self.work_dir.join("prescan").join(format!("{}.json", stem))
    }

    pub fn blind_path(&self, stem: &str) -> PathBuf {
        self.work_dir
            .join("blind_analysis")
            .join(format!("{}.json", stem))
    }

    /// Merged record for one item (authoritative analysis artifact)
    pub fn record_path(&self, stem: &str) -> PathBuf {
        self.work_dir.join("records").join(format!("{}.json", stem))
    }

    pub fn fcpxml_path(&self, stem: &str) -> PathBuf {
        self.work_dir
            .join("fcpxml")
            .join(format!("{}.fcpxml", stem))
    }

    pub fn report_path(&self, stem: &str) -> PathBuf {
        self.work_dir
            .join("reports")
            .join(format!("{}_log.md", stem))
    }

    pub fn synthesis_path(&self) -> PathBuf {
        self.work_dir.join("SYNTHESIS.md")
    }

    /// Create the work directory itself; subdirectories are created by the
    /// writers that populate them.
    pub fn ensure_work_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_for_directory_source() {
        let layout = WorkLayout::for_source(Path::new("/footage"));
        assert_eq!(layout.work_dir(), Path::new("/footage/tapedeck_output"));
        assert_eq!(
            layout.record_path("tape_01"),
            Path::new("/footage/tapedeck_output/records/tape_01.json")
        );
    }

    #[test]
    fn test_single_file_source_gets_own_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tape_01.mp4");
        std::fs::write(&file, b"x").unwrap();

        let layout = WorkLayout::for_source(&file);
        assert_eq!(
            layout.work_dir(),
            dir.path().join(WORK_DIR_NAME).join("tape_01")
        );
    }
}
