//! Artifact path accessors for a resolved `storagePath`.
//!
//! Mirrors the teacher's `Paths` struct (`paths.rs`): resolve once, then
//! offer named accessors instead of scattering `.join(...)` calls through
//! the rest of the crate.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(".state.json")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join("COMPACTION_MANIFEST.json")
    }

    pub fn emergency_file(&self) -> PathBuf {
        self.root.join("EMERGENCY_RECOVERY.jsonl")
    }

    pub fn checkpoint_file(&self, checkpoint_id: &str) -> PathBuf {
        self.checkpoints_dir()
            .join(format!("{checkpoint_id}.json"))
    }

    /// Stream file path for the UTC calendar day of `at`.
    pub fn stream_file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.stream_file_for_date(&at.format("%Y-%m-%d").to_string())
    }

    pub fn stream_file_for_date(&self, date: &str) -> PathBuf {
        self.root.join(format!("action-stream-{date}.jsonl"))
    }

    /// Enumerate stream files under `root`, sorted lexically (== chronological,
    /// since the date is zero-padded and fixed-width).
    pub fn list_stream_files(&self) -> std::io::Result<Vec<PathBuf>> {
        list_stream_files(&self.root)
    }
}

pub fn list_stream_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("action-stream-") && n.ends_with(".jsonl"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Create `path` (and parents) with mode `0700` on Unix, following the
/// teacher's `create_dir_with_mode`.
pub fn create_dir_with_mode(path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;
    std::fs::create_dir_all(path)
        .with_context(|| format!("create_dir_all {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("set_permissions {:?}", path))?;
    }

    Ok(())
}

/// Set mode `0600` on a just-written file, following the teacher's
/// `ensure_device_key` convention for secrets/sensitive artifacts.
pub fn set_file_mode_0600(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use anyhow::Context;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("set_permissions {:?}", path))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_file_naming() {
        let paths = StorePaths::new("/tmp/continuity");
        let path = paths.stream_file_for_date("2030-01-01");
        assert_eq!(
            path,
            PathBuf::from("/tmp/continuity/action-stream-2030-01-01.jsonl")
        );
    }

    #[test]
    fn list_stream_files_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("action-stream-2030-01-02.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("action-stream-2030-01-01.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join(".state.json"), "").unwrap();
        std::fs::write(tmp.path().join("EMERGENCY_RECOVERY.jsonl"), "").unwrap();

        let files = list_stream_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("action-stream-2030-01-01.jsonl"));
        assert!(files[1].ends_with("action-stream-2030-01-02.jsonl"));
    }

    #[test]
    fn list_stream_files_missing_root_is_empty() {
        let files = list_stream_files(Path::new("/nonexistent/path/xyz")).unwrap();
        assert!(files.is_empty());
    }
}
