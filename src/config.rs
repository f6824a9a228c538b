//! Configuration surface for the continuity store.
//!
//! Mirrors the teacher's nested-config-with-serde-defaults shape: every
//! field has a `#[serde(default = "...")]` so a partial config document
//! (or none at all) still produces sane values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How aggressively the Stream Writer admits entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every `append` is a no-op that returns `true` without touching disk.
    Off,
    /// Only entries the adapter has already filtered as decisional.
    Judgment,
    /// All entries.
    Everything,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Everything
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Root directory for all on-disk artifacts. A leading `~` is expanded
    /// to the current user's home at resolution time (see
    /// [`ContinuityConfig::resolved_storage_path`]).
    pub storage_path: PathBuf,

    #[serde(default = "default_true")]
    pub enable_integrity_check: bool,

    /// Advisory: read by the Lifecycle Adapter, not by the Stream Writer.
    #[serde(default)]
    pub block_on_persistence_failure: bool,

    #[serde(default = "default_implicit_resume_threshold_minutes")]
    pub implicit_resume_threshold_minutes: u64,
}

fn default_true() -> bool {
    true
}

fn default_implicit_resume_threshold_minutes() -> u64 {
    30
}

impl ContinuityConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            log_level: LogLevel::default(),
            storage_path: storage_path.into(),
            enable_integrity_check: true,
            block_on_persistence_failure: false,
            implicit_resume_threshold_minutes: default_implicit_resume_threshold_minutes(),
        }
    }

    /// Resolve `storage_path`, expanding a leading `~` to the home
    /// directory, the way the teacher's workspace resolution does.
    pub fn resolved_storage_path(&self) -> PathBuf {
        let raw = self.storage_path.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let cfg = ContinuityConfig::new("/tmp/continuity");
        assert_eq!(cfg.log_level, LogLevel::Everything);
        assert!(cfg.enable_integrity_check);
        assert!(!cfg.block_on_persistence_failure);
        assert_eq!(cfg.implicit_resume_threshold_minutes, 30);
    }

    #[test]
    fn tilde_expands_to_home() {
        let cfg = ContinuityConfig::new("~/continuity-data");
        let resolved = cfg.resolved_storage_path();
        assert!(!resolved.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn deserializes_partial_document() {
        let json = r#"{"storagePath": "/tmp/x"}"#;
        let cfg: ContinuityConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.implicit_resume_threshold_minutes, 30);
        assert!(cfg.enable_integrity_check);
    }
}
