//! Session Restorer: implicit-resumption detection and session summaries (§4.4).
//!
//! Grounded in the teacher's `agent/session_store.rs`, which keeps a
//! rolling window of recent turns and derives a human summary from it;
//! here the window is read back out of the Stream Writer's query path
//! instead of an in-memory ring buffer.

use crate::model::{ActionEnvelope, Severity};
use crate::stream_writer::{QueryFilter, StreamWriter};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const RECENT_ACTIONS_WINDOW: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitResumption {
    pub should_restore: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_time: Option<String>,
    pub gap_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_minutes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_context: Option<ActivitySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub count: u64,
    pub distinct_sessions: u64,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub summary: String,
    pub key_decisions: Vec<ActionEnvelope>,
    pub active_workflows: Vec<String>,
    pub gap_human: String,
}

/// Tool-name substring → inferred workflow, consulted only when an entry's
/// `metadata.workflow` is absent.
const WORKFLOW_MAP: &[(&str, &str)] = &[
    ("write", "file-operations"),
    ("edit", "file-operations"),
    ("exec", "command-execution"),
    ("browser", "web-browsing"),
    ("nodes", "device-management"),
    ("message", "messaging"),
];

pub struct SessionRestorer<'a> {
    writer: &'a StreamWriter,
}

impl<'a> SessionRestorer<'a> {
    pub fn new(writer: &'a StreamWriter) -> Self {
        Self { writer }
    }

    pub async fn detect_implicit_resumption(&self, threshold_minutes: u64) -> ImplicitResumption {
        let stats = self.writer.get_stats().await;
        let Some(last_action_time) = stats.last_action_time else {
            return ImplicitResumption {
                should_restore: false,
                last_activity_time: None,
                gap_minutes: f64::INFINITY,
                threshold_minutes: Some(threshold_minutes),
                recent_context: None,
            };
        };

        let gap_minutes = match chrono::DateTime::parse_from_rfc3339(&last_action_time) {
            Ok(last) => (Utc::now() - last.with_timezone(&Utc)).num_milliseconds() as f64
                / 60_000.0,
            Err(_) => return ImplicitResumption {
                should_restore: false,
                last_activity_time: Some(last_action_time),
                gap_minutes: f64::INFINITY,
                threshold_minutes: Some(threshold_minutes),
                recent_context: None,
            },
        };

        if gap_minutes < threshold_minutes as f64 {
            let recent_context = self.get_recent_activity_summary(1.0).await;
            ImplicitResumption {
                should_restore: true,
                last_activity_time: Some(last_action_time),
                gap_minutes,
                threshold_minutes: Some(threshold_minutes),
                recent_context: Some(recent_context),
            }
        } else {
            ImplicitResumption {
                should_restore: false,
                last_activity_time: Some(last_action_time),
                gap_minutes,
                threshold_minutes: Some(threshold_minutes),
                recent_context: None,
            }
        }
    }

    pub async fn restore_context(&self, session_id: &str) -> SessionContext {
        let recent = self
            .writer
            .query_actions(QueryFilter {
                limit: Some(RECENT_ACTIONS_WINDOW),
                ..Default::default()
            })
            .await;

        let session_actions: Vec<ActionEnvelope> = recent
            .into_iter()
            .filter(|a| a.session_id.as_deref() == Some(session_id))
            .collect();

        let summary = summarize(&session_actions);
        let key_decisions = session_actions
            .iter()
            .filter(|a| {
                matches!(a.severity, Severity::Critical | Severity::High)
                    || a.action_type == "decision"
                    || a.action_type == "commit"
            })
            .cloned()
            .collect();
        let active_workflows = infer_workflows(&session_actions);
        let gap_human = session_actions
            .last()
            .map(|a| human_gap(&a.timestamp))
            .unwrap_or_else(|| "unknown".to_string());

        SessionContext {
            session_id: session_id.to_string(),
            summary,
            key_decisions,
            active_workflows,
            gap_human,
        }
    }

    pub async fn get_recent_activity_summary(&self, hours_back: f64) -> ActivitySummary {
        let since = (Utc::now() - chrono::Duration::milliseconds((hours_back * 3_600_000.0) as i64))
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string();

        let actions = self
            .writer
            .query_actions(QueryFilter {
                since: Some(since),
                ..Default::default()
            })
            .await;

        let distinct_sessions: HashSet<&str> = actions
            .iter()
            .filter_map(|a| a.session_id.as_deref())
            .collect();

        let highlights: Vec<String> = actions
            .iter()
            .filter(|a| a.severity == Severity::Critical || a.action_type == "agent_start")
            .map(|a| format!("[{}] {}", a.timestamp, a.description))
            .take(5)
            .collect();

        ActivitySummary {
            count: actions.len() as u64,
            distinct_sessions: distinct_sessions.len() as u64,
            highlights,
        }
    }
}

fn summarize(actions: &[ActionEnvelope]) -> String {
    if actions.is_empty() {
        return "no recorded activity".to_string();
    }

    let mut histogram: HashMap<&str, u64> = HashMap::new();
    let mut critical_high = 0u64;
    for a in actions {
        *histogram.entry(a.action_type.as_str()).or_insert(0) += 1;
        if matches!(a.severity, Severity::Critical | Severity::High) {
            critical_high += 1;
        }
    }

    let duration = match (actions.first(), actions.last()) {
        (Some(first), Some(last)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(&first.timestamp),
                chrono::DateTime::parse_from_rfc3339(&last.timestamp),
            ) {
                (Ok(a), Ok(b)) => (b - a).num_minutes().unsigned_abs(),
                _ => 0,
            }
        }
        _ => 0,
    };

    let mut types: Vec<_> = histogram.into_iter().collect();
    types.sort_by(|a, b| b.1.cmp(&a.1));
    let top_types = types
        .iter()
        .take(3)
        .map(|(t, n)| format!("{t}×{n}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{} actions over {} min ({} critical/high): {}",
        actions.len(),
        duration,
        critical_high,
        top_types
    )
}

fn infer_workflows(actions: &[ActionEnvelope]) -> Vec<String> {
    let mut workflows = Vec::new();
    for a in actions {
        let explicit = a
            .metadata
            .as_ref()
            .and_then(|m| m.get("workflow"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let inferred = explicit.or_else(|| {
            a.tool_name.as_deref().and_then(|name| {
                let lower = name.to_lowercase();
                WORKFLOW_MAP
                    .iter()
                    .find(|(pattern, _)| lower.contains(pattern))
                    .map(|(_, workflow)| workflow.to_string())
            })
        });

        if let Some(w) = inferred {
            if !workflows.contains(&w) {
                workflows.push(w);
            }
        }
    }
    workflows
}

fn human_gap(timestamp: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(timestamp) {
        Ok(then) => {
            let minutes = (Utc::now() - then.with_timezone(&Utc)).num_minutes();
            if minutes < 1 {
                "just now".to_string()
            } else if minutes < 60 {
                format!("{minutes} minutes ago")
            } else {
                format!("{} hours ago", minutes / 60)
            }
        }
        Err(_) => "unknown".to_string(),
    }
}
