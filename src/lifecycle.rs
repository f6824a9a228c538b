//! Lifecycle Adapter: the boundary between a host and the continuity store (§4.5).
//!
//! The adapter itself owns no durable state; it translates `HostEvent`s
//! into calls on [`StreamWriter`], [`CheckpointManager`], and
//! [`SessionRestorer`]. Shaped after the teacher's `HeartbeatRunner`: a
//! struct wired up once at boot, driven by a loop it doesn't own, calling
//! into components that do the actual persistence.

use crate::checkpoint::{CheckpointData, CheckpointManager};
use crate::config::{ContinuityConfig, LogLevel};
use crate::integrity;
use crate::model::{self, ActionEnvelope, Severity};
use crate::session_restorer::SessionRestorer;
use crate::stream_writer::StreamWriter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::OnceLock;
use tracing::{info, warn};

/// The boundary a host drives. Expressed as a trait (rather than a bare
/// inherent method) so a host can hold the adapter behind a `dyn` handle
/// without depending on its concrete type.
#[async_trait]
pub trait HostEventSink {
    async fn handle(&self, event: HostEvent) -> Result<Option<ToolCallDecision>>;
}

fn decisional_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(decide|decision|conclude|conclusion|recommend|analysis|think|believe)\b")
            .expect("decisional regex is a fixed literal")
    })
}

/// Tool name patterns the adapter treats as critical (logged pre-execution
/// at `severity: critical` regardless of `logLevel`).
#[derive(Debug, Clone, Default)]
pub struct CriticalToolPatterns(pub Vec<String>);

impl CriticalToolPatterns {
    pub fn is_critical(&self, tool_name: &str) -> bool {
        let lower = tool_name.to_lowercase();
        self.0.iter().any(|p| lower.contains(p.as_str()))
    }
}

/// Host events the adapter must be able to react to, per the contract
/// table in §4.5.
#[derive(Debug, Clone)]
pub enum HostEvent {
    BootPost,
    ShutdownPre,
    BeforeAgentStart {
        session_id: String,
        resumed_from: Option<String>,
    },
    AgentEnd {
        session_id: String,
    },
    AgentError {
        session_id: String,
        detail: String,
    },
    BeforeToolCall {
        session_id: String,
        tool_name: String,
        tool_params: serde_json::Value,
    },
    AfterToolCall {
        session_id: String,
        tool_name: String,
        parent_action_id: Option<String>,
        result_summary: String,
    },
    ToolError {
        session_id: String,
        tool_name: String,
        parent_action_id: Option<String>,
        detail: String,
    },
    MessageReceived {
        session_id: String,
        platform: String,
    },
    MessageSending {
        session_id: String,
        platform: String,
        content: String,
    },
    MessageSendFailed {
        session_id: String,
        platform: String,
        detail: String,
    },
    BeforeCompaction {
        checkpoint: CheckpointData,
    },
    AfterCompaction,
}

/// Outcome the host should act on after `before_tool_call`: whether it may
/// proceed, and (if it logged an entry) the id to correlate the result.
#[derive(Debug, Clone)]
pub struct ToolCallDecision {
    pub allow: bool,
    pub action_id: Option<String>,
}

pub struct LifecycleAdapter {
    writer: StreamWriter,
    checkpoints: CheckpointManager,
    config: ContinuityConfig,
    critical_tools: CriticalToolPatterns,
    platform: String,
}

impl LifecycleAdapter {
    pub fn new(config: ContinuityConfig, platform: impl Into<String>, critical_tools: CriticalToolPatterns) -> Self {
        let root = config.resolved_storage_path();
        Self {
            writer: StreamWriter::new(config.clone()),
            checkpoints: CheckpointManager::new(root),
            config,
            critical_tools,
            platform: platform.into(),
        }
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    fn restorer(&self) -> SessionRestorer<'_> {
        SessionRestorer::new(&self.writer)
    }

    fn new_envelope(
        &self,
        action_type: &str,
        severity: Severity,
        description: impl Into<String>,
    ) -> ActionEnvelope {
        ActionEnvelope::new(
            uuid::Uuid::new_v4().to_string(),
            now_iso(),
            action_type,
            severity,
            &self.platform,
            description,
        )
    }
}

#[async_trait]
impl HostEventSink for LifecycleAdapter {
    /// Drive a single host event to completion.
    async fn handle(&self, event: HostEvent) -> Result<Option<ToolCallDecision>> {
        match event {
            HostEvent::BootPost => {
                self.writer.initialize().await.context("initialize store")?;
                let report = integrity::validate_stream(self.writer.storage_root())
                    .context("run startup health check")?;
                if !report.valid {
                    warn!(errors = report.errors.len(), "continuity store health check found integrity errors");
                }
                info!(total_checked = report.total_checked, "continuity store initialized");
                Ok(None)
            }
            HostEvent::ShutdownPre => {
                self.writer.close().await.context("close store")?;
                Ok(None)
            }
            HostEvent::BeforeAgentStart { session_id, resumed_from } => {
                if let Some(checkpoint_id) = resumed_from {
                    let ctx = self.restorer().restore_context(&session_id).await;
                    self.writer
                        .append(
                            self.new_envelope(
                                model::TYPE_CONTINUITY_RESTORE,
                                Severity::Medium,
                                format!("resumed from {checkpoint_id}: {}", ctx.summary),
                            )
                            .with_session(session_id.clone()),
                        )
                        .await;
                } else {
                    let resumption = self
                        .restorer()
                        .detect_implicit_resumption(self.config.implicit_resume_threshold_minutes)
                        .await;
                    if resumption.should_restore {
                        self.writer
                            .append(
                                self.new_envelope(
                                    model::TYPE_CONTINUITY_IMPLICIT_RESTORE,
                                    Severity::Medium,
                                    format!(
                                        "implicit resumption, gap {:.1} min",
                                        resumption.gap_minutes
                                    ),
                                )
                                .with_session(session_id.clone()),
                            )
                            .await;
                    }
                }

                self.writer
                    .append(
                        self.new_envelope(model::TYPE_AGENT_START, Severity::Low, "agent started")
                            .with_session(session_id),
                    )
                    .await;
                Ok(None)
            }
            HostEvent::AgentEnd { session_id } => {
                self.writer
                    .append(
                        self.new_envelope(model::TYPE_AGENT_END, Severity::Low, "agent ended")
                            .with_session(session_id),
                    )
                    .await;
                Ok(None)
            }
            HostEvent::AgentError { session_id, detail } => {
                self.writer
                    .append(
                        self.new_envelope(model::TYPE_AGENT_ERROR, Severity::High, detail)
                            .with_session(session_id),
                    )
                    .await;
                Ok(None)
            }
            HostEvent::BeforeToolCall { session_id, tool_name, tool_params } => {
                let critical = self.critical_tools.is_critical(&tool_name);
                if !critical && self.config.log_level != LogLevel::Everything {
                    return Ok(Some(ToolCallDecision { allow: true, action_id: None }));
                }

                let severity = if critical { Severity::Critical } else { Severity::Low };
                let entry = self
                    .new_envelope(model::TYPE_TOOL_CALL, severity, format!("calling {tool_name}"))
                    .with_session(session_id)
                    .with_tool(tool_name, tool_params);
                let action_id = entry.id.clone();

                let ok = self.writer.append(entry).await;
                if !ok && critical && self.config.block_on_persistence_failure {
                    return Ok(Some(ToolCallDecision { allow: false, action_id: None }));
                }
                Ok(Some(ToolCallDecision {
                    allow: true,
                    action_id: ok.then_some(action_id),
                }))
            }
            HostEvent::AfterToolCall { session_id, tool_name, parent_action_id, result_summary } => {
                let mut entry = self
                    .new_envelope(model::TYPE_TOOL_RESULT, Severity::Low, result_summary)
                    .with_session(session_id)
                    .with_tool(tool_name, serde_json::Value::Null);
                if let Some(parent) = parent_action_id {
                    entry = entry.with_parent(parent);
                }
                self.writer.append(entry).await;
                Ok(None)
            }
            HostEvent::ToolError { session_id, tool_name, parent_action_id, detail } => {
                let mut entry = self
                    .new_envelope(model::TYPE_TOOL_ERROR, Severity::High, detail)
                    .with_session(session_id)
                    .with_tool(tool_name, serde_json::Value::Null);
                if let Some(parent) = parent_action_id {
                    entry = entry.with_parent(parent);
                }
                self.writer.append(entry).await;
                Ok(None)
            }
            HostEvent::MessageReceived { session_id, platform } => {
                self.writer
                    .append(
                        self.new_envelope(
                            model::TYPE_MESSAGE_RECEIVED,
                            Severity::Low,
                            format!("message received on {platform}"),
                        )
                        .with_session(session_id),
                    )
                    .await;
                Ok(None)
            }
            HostEvent::MessageSending { session_id, platform, content } => {
                let decisional = decisional_regex().is_match(&content);
                if self.config.log_level == LogLevel::Judgment && !decisional {
                    return Ok(None);
                }
                self.writer
                    .append(
                        self.new_envelope(
                            model::TYPE_MESSAGE_SENDING,
                            Severity::Low,
                            format!("sending on {platform}"),
                        )
                        .with_session(session_id),
                    )
                    .await;
                Ok(None)
            }
            HostEvent::MessageSendFailed { session_id, platform, detail } => {
                self.writer
                    .append(
                        self.new_envelope(
                            model::TYPE_MESSAGE_SEND_FAILED,
                            Severity::High,
                            format!("send failed on {platform}: {detail}"),
                        )
                        .with_session(session_id),
                    )
                    .await;
                Ok(None)
            }
            HostEvent::BeforeCompaction { checkpoint } => {
                let checkpoint_id = self
                    .checkpoints
                    .create_checkpoint(checkpoint)
                    .context("create pre-compaction checkpoint")?;
                self.writer
                    .append(self.new_envelope(
                        model::TYPE_COMPACTION,
                        Severity::Medium,
                        format!("checkpoint {checkpoint_id} created before compaction"),
                    ))
                    .await;
                Ok(None)
            }
            HostEvent::AfterCompaction => {
                self.writer
                    .append(self.new_envelope(
                        model::TYPE_COMPACTION_COMPLETE,
                        Severity::Low,
                        "compaction complete",
                    ))
                    .await;
                Ok(None)
            }
        }
    }
}

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(root: &std::path::Path) -> LifecycleAdapter {
        LifecycleAdapter::new(
            ContinuityConfig::new(root),
            "openclaw",
            CriticalToolPatterns(vec!["write".to_string(), "exec".to_string()]),
        )
    }

    #[tokio::test]
    async fn boot_then_agent_start_logs_two_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(tmp.path());
        adapter.handle(HostEvent::BootPost).await.unwrap();
        adapter
            .handle(HostEvent::BeforeAgentStart {
                session_id: "s1".to_string(),
                resumed_from: None,
            })
            .await
            .unwrap();

        let recent = adapter.writer().get_recent_actions(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action_type, model::TYPE_AGENT_START);
    }

    #[tokio::test]
    async fn critical_tool_call_blocks_on_failed_append_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ContinuityConfig::new(tmp.path());
        config.block_on_persistence_failure = true;
        config.log_level = LogLevel::Off;
        let adapter = LifecycleAdapter::new(
            config,
            "openclaw",
            CriticalToolPatterns(vec!["write".to_string()]),
        );
        adapter.handle(HostEvent::BootPost).await.unwrap();

        // log_level off makes append a no-op returning true, so the call
        // is allowed even though nothing was persisted.
        let decision = adapter
            .handle(HostEvent::BeforeToolCall {
                session_id: "s1".to_string(),
                tool_name: "write_file".to_string(),
                tool_params: serde_json::json!({}),
            })
            .await
            .unwrap()
            .unwrap();
        assert!(decision.allow);
    }

    #[tokio::test]
    async fn judgment_level_admits_only_decisional_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ContinuityConfig::new(tmp.path());
        config.log_level = LogLevel::Judgment;
        let adapter = LifecycleAdapter::new(config, "openclaw", CriticalToolPatterns::default());
        adapter.handle(HostEvent::BootPost).await.unwrap();

        adapter
            .handle(HostEvent::MessageSending {
                session_id: "s1".to_string(),
                platform: "telegram".to_string(),
                content: "just saying hi".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(adapter.writer().get_recent_actions(10).await.len(), 0);

        adapter
            .handle(HostEvent::MessageSending {
                session_id: "s1".to_string(),
                platform: "telegram".to_string(),
                content: "I recommend we proceed".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(adapter.writer().get_recent_actions(10).await.len(), 1);
    }
}
