//! Checkpoint Manager: pre-compaction recovery snapshots (§4.3).
//!
//! The manifest-overwrite-plus-per-checkpoint-file split mirrors the
//! teacher's `signing.rs` (one durable manifest, rewritten wholesale on
//! each signing) combined with `security/audit.rs`'s append-log pruning
//! idea, generalized here to checkpoint file pruning by count instead of
//! log-line count.

use crate::paths::{create_dir_with_mode, set_file_mode_0600, StorePaths};
use anyhow::{Context, Result};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Checkpoints beyond this count (oldest first) are pruned on each create.
pub const MAX_CHECKPOINTS: usize = 50;

/// Arbitrary snapshot payload handed in by the Lifecycle Adapter. Kept as
/// an open JSON value — the adapter owns what "session identity" and
/// "message count" mean to its host; see `CheckpointData::message_count`
/// for the one field the manager reads itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointData {
    pub timestamp: String,
    pub message_count: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryInfo {
    pub original_message_range: MessageRange,
    pub compacted_at: String,
    pub can_recover: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionManifest {
    pub schema_version: String,
    pub checkpoint: CheckpointData,
    #[serde(rename = "recoveryInfo")]
    pub recovery_info: RecoveryInfo,
}

impl CompactionManifest {
    pub const SCHEMA_VERSION: &'static str = "1.0.0";
}

pub struct CheckpointManager {
    paths: StorePaths,
}

impl CheckpointManager {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            paths: StorePaths::new(root.into()),
        }
    }

    /// Mint a checkpoint id, write the checkpoint payload, overwrite the
    /// manifest, and prune excess checkpoints.
    pub fn create_checkpoint(&self, data: CheckpointData) -> Result<String> {
        create_dir_with_mode(&self.paths.checkpoints_dir())
            .context("create checkpoints dir")?;

        let checkpoint_id = mint_checkpoint_id();
        let checkpoint_path = self.paths.checkpoint_file(&checkpoint_id);
        let payload = serde_json::to_string_pretty(&data).context("serialize checkpoint")?;
        std::fs::write(&checkpoint_path, payload).context("write checkpoint file")?;
        set_file_mode_0600(&checkpoint_path)?;

        let message_count = data.message_count;
        let manifest = CompactionManifest {
            schema_version: CompactionManifest::SCHEMA_VERSION.to_string(),
            checkpoint: data.clone(),
            recovery_info: RecoveryInfo {
                original_message_range: MessageRange {
                    start: message_count.saturating_sub(100),
                    end: message_count,
                },
                compacted_at: data.timestamp.clone(),
                can_recover: true,
            },
        };
        self.write_manifest(&manifest)?;

        self.prune_excess()?;

        Ok(checkpoint_id)
    }

    fn write_manifest(&self, manifest: &CompactionManifest) -> Result<()> {
        let path = self.paths.manifest_file();
        let payload = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
        std::fs::write(&path, payload).context("write manifest")?;
        set_file_mode_0600(&path)?;
        Ok(())
    }

    fn prune_excess(&self) -> Result<()> {
        let files = self.list_checkpoint_files()?;
        if files.len() <= MAX_CHECKPOINTS {
            return Ok(());
        }
        // Sort oldest-first by each checkpoint's own embedded `timestamp`
        // field (spec: "sorted by timestamp, newest first"), not filesystem
        // mtime — a backfilled or clock-skewed write order must not change
        // which checkpoints survive pruning.
        let mut dated: Vec<(String, std::path::PathBuf)> = files
            .into_iter()
            .map(|f| {
                let timestamp = std::fs::read_to_string(&f)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<CheckpointData>(&raw).ok())
                    .map(|c| c.timestamp)
                    .unwrap_or_default();
                (timestamp, f)
            })
            .collect();
        dated.sort_by(|a, b| a.0.cmp(&b.0));

        let excess = dated.len() - MAX_CHECKPOINTS;
        for (_, file) in dated.into_iter().take(excess) {
            std::fs::remove_file(&file)
                .with_context(|| format!("prune checkpoint {:?}", file))?;
        }
        Ok(())
    }

    fn list_checkpoint_files(&self) -> Result<Vec<std::path::PathBuf>> {
        let dir = self.paths.checkpoints_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let files = std::fs::read_dir(&dir)
            .context("read checkpoints dir")?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        Ok(files)
    }

    pub fn get_manifest(&self) -> Result<Option<CompactionManifest>> {
        read_json_if_exists(&self.paths.manifest_file())
    }

    pub fn get_last_checkpoint(&self) -> Result<Option<CheckpointData>> {
        Ok(self.get_manifest()?.map(|m| m.checkpoint))
    }

    pub fn list_checkpoints(&self) -> Result<Vec<String>> {
        let mut files = self.list_checkpoint_files()?;
        files.sort();
        Ok(files
            .into_iter()
            .filter_map(|f| f.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect())
    }

    /// True iff the manifest exists, `canRecover` is true, and the
    /// referenced checkpoint file still exists.
    pub fn can_recover(&self) -> Result<bool> {
        let Some(manifest) = self.get_manifest()? else {
            return Ok(false);
        };
        if !manifest.recovery_info.can_recover {
            return Ok(false);
        }
        // The manifest embeds the checkpoint payload, not its id, so we
        // treat "referenced checkpoint file still exists" as "at least one
        // checkpoint file with a matching timestamp survives pruning".
        Ok(self.list_checkpoint_files()?.iter().any(|f| {
            std::fs::read_to_string(f)
                .ok()
                .and_then(|raw| serde_json::from_str::<CheckpointData>(&raw).ok())
                .map(|c| c.timestamp == manifest.checkpoint.timestamp)
                .unwrap_or(false)
        }))
    }

    /// If the manifest's checkpoint matches `id`, flip `canRecover` to
    /// false and rewrite the manifest.
    pub fn mark_recovered(&self, checkpoint_id: &str) -> Result<bool> {
        let Some(mut manifest) = self.get_manifest()? else {
            return Ok(false);
        };
        let checkpoint_path = self.paths.checkpoint_file(checkpoint_id);
        if !checkpoint_path.exists() {
            return Ok(false);
        }
        let on_disk: CheckpointData = serde_json::from_str(
            &std::fs::read_to_string(&checkpoint_path).context("read checkpoint file")?,
        )
        .context("parse checkpoint file")?;
        if on_disk.timestamp != manifest.checkpoint.timestamp {
            return Ok(false);
        }
        manifest.recovery_info.can_recover = false;
        self.write_manifest(&manifest)?;
        Ok(true)
    }
}

fn read_json_if_exists<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let value = serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))?;
    Ok(Some(value))
}

fn mint_checkpoint_id() -> String {
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();

    format!("checkpoint-{epoch_ms}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(timestamp: &str, message_count: u64) -> CheckpointData {
        CheckpointData {
            timestamp: timestamp.to_string(),
            message_count,
            extra: serde_json::Map::from_iter([("sessionId".to_string(), json!("s1"))]),
        }
    }

    #[test]
    fn create_checkpoint_writes_manifest_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path());
        let id = mgr.create_checkpoint(data("2030-01-01T00:00:00.000Z", 150)).unwrap();

        assert!(mgr.list_checkpoints().unwrap().contains(&id));
        let manifest = mgr.get_manifest().unwrap().unwrap();
        assert_eq!(manifest.recovery_info.original_message_range.start, 50);
        assert_eq!(manifest.recovery_info.original_message_range.end, 150);
        assert!(manifest.recovery_info.can_recover);
    }

    #[test]
    fn prunes_to_max_checkpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path());
        for i in 0..(MAX_CHECKPOINTS + 1) {
            mgr.create_checkpoint(data(&format!("2030-01-01T00:00:{i:02}.000Z"), i as u64))
                .unwrap();
        }
        assert_eq!(mgr.list_checkpoints().unwrap().len(), MAX_CHECKPOINTS);
    }

    #[test]
    fn can_recover_false_without_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path());
        assert!(!mgr.can_recover().unwrap());
    }

    #[test]
    fn mark_recovered_flips_can_recover() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path());
        let id = mgr.create_checkpoint(data("2030-01-01T00:00:00.000Z", 10)).unwrap();

        assert!(mgr.can_recover().unwrap());
        assert!(mgr.mark_recovered(&id).unwrap());
        assert!(!mgr.get_manifest().unwrap().unwrap().recovery_info.can_recover);
        assert!(!mgr.can_recover().unwrap());
    }
}
