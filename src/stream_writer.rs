//! The Stream Writer: durable append of action envelopes (§4.1).
//!
//! Internal structure is grounded in the teacher's `AuditWriter`-shaped
//! functions in `security/audit.rs` (chain-hash-then-append) and in
//! `agent/session_store.rs`'s pattern of an in-memory struct guarded by a
//! single mutex and mirrored to a small JSON state file. Every write goes
//! through one open→write→`sync_all`→close cycle, and every created file
//! or directory is locked down to `0600`/`0700` following
//! `security/signing.rs::ensure_device_key` and `paths.rs`.

use crate::canonical::canonical_json_line;
use crate::clock::{Clock, SystemClock};
use crate::config::{ContinuityConfig, LogLevel};
use crate::disk;
use crate::integrity;
use crate::model::{ActionEnvelope, Integrity, PersistedState, StreamHeader};
use crate::paths::{create_dir_with_mode, set_file_mode_0600, StorePaths};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Mutated only while holding the writer's mutex. Mirrors `.state.json`
/// plus the fields that never touch disk (§5, "Shared state").
#[derive(Debug, Clone, Default)]
struct WriterState {
    sequence: u64,
    last_hash: Option<String>,
    current_stream_path: Option<PathBuf>,
    emergency_mode: bool,
    initialized: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub action_type: Option<String>,
    pub platform: Option<String>,
    /// Inclusive lower bound, ISO-8601 UTC string (lexical comparison).
    pub since: Option<String>,
    /// Inclusive upper bound, ISO-8601 UTC string (lexical comparison).
    pub until: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub total_actions: u64,
    pub stream_files: usize,
    #[serde(rename = "storageSizeMB")]
    pub storage_size_mb: f64,
    pub last_action_time: Option<String>,
    /// Surfaces `disk::EMERGENCY_THRESHOLD_MB` as health info rather than a
    /// behavioral branch — see spec's open question on that constant.
    pub critical_disk: bool,
    pub emergency_mode: bool,
}

pub struct StreamWriter {
    config: ContinuityConfig,
    paths: StorePaths,
    state: Mutex<WriterState>,
    clock: Box<dyn Clock>,
}

impl StreamWriter {
    pub fn new(config: ContinuityConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Same as [`StreamWriter::new`] but with an injectable clock, so
    /// tests can drive rotation across a UTC day boundary (§8 P5) without
    /// sleeping real time.
    pub fn with_clock(config: ContinuityConfig, clock: Box<dyn Clock>) -> Self {
        let root = config.resolved_storage_path();
        Self {
            config,
            paths: StorePaths::new(root),
            state: Mutex::new(WriterState::default()),
            clock,
        }
    }

    pub fn storage_root(&self) -> &std::path::Path {
        &self.paths.root
    }

    /// Idempotent. Creates the directory layout, loads `.state.json` (or
    /// self-heals `lastHash` from the on-disk chain tail when it's
    /// missing), and resolves the current-day stream path.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        create_dir_with_mode(&self.paths.root).context("create storage root")?;
        create_dir_with_mode(&self.paths.checkpoints_dir()).context("create checkpoints dir")?;
        create_dir_with_mode(&self.paths.backups_dir()).context("create backups dir")?;

        let state_file = self.paths.state_file();
        if state_file.exists() {
            let raw = tokio::fs::read_to_string(&state_file)
                .await
                .context("read .state.json")?;
            let persisted: PersistedState =
                serde_json::from_str(&raw).context("parse .state.json")?;
            state.sequence = persisted.sequence;
            state.last_hash = persisted.last_hash;
        } else {
            state.sequence = 0;
            state.last_hash = None;
        }

        if state.last_hash.is_none() && self.config.enable_integrity_check {
            // `.state.json` absent or has no recorded hash — reconstruct it
            // from the chain tail rather than silently chaining against
            // "genesis" again, which would break I2 (resolved open question).
            match integrity::get_last_hash(&self.paths.root) {
                Ok(Some(hash)) => state.last_hash = Some(hash),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to self-heal lastHash from stream tail"),
            }
        }

        let now = self.clock.now();
        let stream_path = self.paths.stream_file_for(now);
        if !stream_path.exists() {
            self.write_header(&stream_path, now).await?;
        }
        state.current_stream_path = Some(stream_path);
        state.initialized = true;

        Ok(())
    }

    async fn write_header(&self, path: &std::path::Path, now: chrono::DateTime<Utc>) -> Result<()> {
        let header = StreamHeader::new(
            now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            self.config.enable_integrity_check,
        );
        let line = canonical_json_line(&header)?;
        match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{line}").context("write stream header")?;
                file.sync_all().context("fsync stream header")?;
                set_file_mode_0600(path)?;
                Ok(())
            }
            // Another append beat us to creating the file for this day;
            // the file already has a valid header, nothing to do.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e).context("create stream file"),
        }
    }

    /// The only mutation path. Never raises — failures latch emergency
    /// mode and are logged, per §7's "the writer never raises" contract.
    pub async fn append(&self, mut entry: ActionEnvelope) -> bool {
        if self.config.log_level == LogLevel::Off {
            return true;
        }

        let mut state = self.state.lock().await;

        if !state.initialized {
            error!("append called before initialize");
            return false;
        }

        if state.emergency_mode {
            drop(state);
            return self.append_emergency(entry).await;
        }

        if disk::is_below_floor(&self.paths.root) {
            warn!(path = %self.paths.root.display(), "free space below floor, latching emergency mode");
            state.emergency_mode = true;
            drop(state);
            return self.append_emergency(entry).await;
        }

        let now = self.clock.now();
        let day_path = self.paths.stream_file_for(now);
        if state.current_stream_path.as_ref() != Some(&day_path) {
            if let Err(e) = self.write_header(&day_path, now).await {
                error!(error = %e, "failed to rotate stream file, routing to emergency log");
                state.emergency_mode = true;
                drop(state);
                return self.append_emergency(entry).await;
            }
            state.current_stream_path = Some(day_path.clone());
        }

        let next_sequence = state.sequence + 1;
        entry.sequence = Some(next_sequence);

        if self.config.enable_integrity_check {
            let previous = state
                .last_hash
                .clone()
                .unwrap_or_else(|| Integrity::GENESIS.to_string());
            match canonical_json_line(&entry) {
                Ok(unsealed) => {
                    let mut hasher = Sha256::new();
                    hasher.update(unsealed.as_bytes());
                    hasher.update(previous.as_bytes());
                    let hash = format!("{:x}", hasher.finalize());
                    entry.integrity = Some(Integrity { hash, previous });
                }
                Err(e) => {
                    error!(error = %e, "failed to serialize entry for hashing");
                    return false;
                }
            }
        }

        let line = match canonical_json_line(&entry) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to serialize entry");
                return false;
            }
        };

        let write_result = Self::append_line_durably(&day_path, &line);
        match write_result {
            Ok(()) => {
                state.sequence = next_sequence;
                if let Some(integrity) = &entry.integrity {
                    state.last_hash = Some(integrity.hash.clone());
                }
                true
            }
            Err(e) => {
                error!(error = %e, "append failed, routing to emergency log");
                state.emergency_mode = true;
                drop(state);
                self.append_emergency(entry).await
            }
        }
    }

    /// Write the envelope, augmented with `_emergency` fields, to
    /// `EMERGENCY_RECOVERY.jsonl`. No chain, no sequence update.
    pub async fn append_emergency(&self, mut entry: ActionEnvelope) -> bool {
        entry.emergency = Some(true);
        entry.emergency_timestamp = Some(self.clock.now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string());

        let line = match canonical_json_line(&entry) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to serialize emergency entry");
                return false;
            }
        };

        match Self::append_line_durably(&self.paths.emergency_file(), &line) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "emergency append failed");
                false
            }
        }
    }

    /// One open→append→fsync→close cycle, mode `0600`.
    fn append_line_durably(path: &std::path::Path, line: &str) -> Result<()> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {:?}", path))?;
        writeln!(file, "{line}").context("write entry")?;
        file.sync_all().context("fsync entry")?;
        if is_new {
            set_file_mode_0600(path)?;
        }
        Ok(())
    }

    /// Tail the current day's file and return up to `limit` most recent
    /// valid entries in forward order. Malformed lines are skipped.
    pub async fn get_recent_actions(&self, limit: usize) -> Vec<ActionEnvelope> {
        let state = self.state.lock().await;
        let Some(path) = state.current_stream_path.clone() else {
            return Vec::new();
        };
        drop(state);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut entries: Vec<ActionEnvelope> = content
            .lines()
            .rev()
            .filter_map(|line| {
                if line.is_empty() {
                    return None;
                }
                serde_json::from_str::<ActionEnvelope>(line).ok()
            })
            .take(limit)
            .collect();
        entries.reverse();
        entries
    }

    /// Iterate all stream files in chronological order, yielding entries
    /// matching every provided predicate, stopping at `limit`.
    pub async fn query_actions(&self, filter: QueryFilter) -> Vec<ActionEnvelope> {
        let files = self.paths.list_stream_files().unwrap_or_default();
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();

        for file in files {
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            for line in content.lines() {
                if line.is_empty() {
                    continue;
                }
                let Ok(entry) = serde_json::from_str::<ActionEnvelope>(line) else {
                    continue;
                };
                if !matches_filter(&entry, &filter) {
                    continue;
                }
                out.push(entry);
                if out.len() >= limit {
                    return out;
                }
            }
        }

        out
    }

    pub async fn get_stats(&self) -> StreamStats {
        let state = self.state.lock().await;
        let files = self.paths.list_stream_files().unwrap_or_default();
        let storage_size_bytes: u64 = files
            .iter()
            .filter_map(|f| std::fs::metadata(f).ok())
            .map(|m| m.len())
            .sum();

        let last_action_time = self
            .last_action_time_sync(&files)
            .unwrap_or(None);

        StreamStats {
            total_actions: state.sequence,
            stream_files: files.len(),
            storage_size_mb: storage_size_bytes as f64 / (1024.0 * 1024.0),
            last_action_time,
            critical_disk: disk::is_critical(&self.paths.root),
            emergency_mode: state.emergency_mode,
        }
    }

    fn last_action_time_sync(&self, files: &[PathBuf]) -> Option<Option<String>> {
        for file in files.iter().rev() {
            let content = std::fs::read_to_string(file).ok()?;
            for line in content.lines().rev() {
                if line.is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<ActionEnvelope>(line) {
                    return Some(Some(entry.timestamp));
                }
            }
        }
        Some(None)
    }

    /// Persists `.state.json` (I6).
    pub async fn close(&self) -> Result<()> {
        let state = self.state.lock().await;
        let persisted = PersistedState {
            sequence: state.sequence,
            last_hash: state.last_hash.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted).context("serialize .state.json")?;
        tokio::fs::write(self.paths.state_file(), json)
            .await
            .context("write .state.json")?;
        set_file_mode_0600(&self.paths.state_file())?;
        Ok(())
    }
}

fn matches_filter(entry: &ActionEnvelope, filter: &QueryFilter) -> bool {
    if let Some(t) = &filter.action_type {
        if &entry.action_type != t {
            return false;
        }
    }
    if let Some(p) = &filter.platform {
        if &entry.platform != p {
            return false;
        }
    }
    if let Some(since) = &filter.since {
        if entry.timestamp.as_str() < since.as_str() {
            return false;
        }
    }
    if let Some(until) = &filter.until {
        if entry.timestamp.as_str() > until.as_str() {
            return false;
        }
    }
    true
}
