//! The action envelope and the small set of types that travel with it.
//!
//! `metadata` and `toolParams` are kept as open `serde_json::Value` maps
//! rather than concrete records — the source system treats them as
//! dynamically typed, and forcing a schema on them would reject valid
//! entries from hosts we don't control.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Tag drawn from a small open set. Modeled as a `String` rather than an enum
/// so that a host can emit a type this crate doesn't yet know about without
/// every entry round-trip failing to parse.
pub type ActionType = String;

pub const TYPE_AGENT_START: &str = "agent_start";
pub const TYPE_AGENT_END: &str = "agent_end";
pub const TYPE_AGENT_ERROR: &str = "agent_error";
pub const TYPE_TOOL_CALL: &str = "tool_call";
pub const TYPE_TOOL_RESULT: &str = "tool_result";
pub const TYPE_TOOL_ERROR: &str = "tool_error";
pub const TYPE_MESSAGE_RECEIVED: &str = "message_received";
pub const TYPE_MESSAGE_SENDING: &str = "message_sending";
pub const TYPE_MESSAGE_SEND_FAILED: &str = "message_send_failed";
pub const TYPE_RESPONSE_ERROR: &str = "response_error";
pub const TYPE_COMPACTION: &str = "compaction";
pub const TYPE_COMPACTION_COMPLETE: &str = "compaction_complete";
pub const TYPE_CONTINUITY_RESTORE: &str = "continuity_restore";
pub const TYPE_CONTINUITY_IMPLICIT_RESTORE: &str = "continuity_implicit_restore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Hash-chain metadata attached to a sealed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    pub hash: String,
    pub previous: String,
}

impl Integrity {
    pub const GENESIS: &'static str = "genesis";
}

/// One side-effecting action, as created by the Lifecycle Adapter.
///
/// `sequence` and `_integrity` are absent until the Stream Writer seals the
/// entry — callers build an `ActionEnvelope` and hand it to
/// [`crate::stream_writer::StreamWriter::append`], which fills both in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEnvelope {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    pub timestamp: String,

    #[serde(rename = "type")]
    pub action_type: ActionType,

    pub severity: Severity,

    pub platform: String,

    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_params: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,

    #[serde(rename = "_integrity", default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,

    /// Present only on entries routed to `EMERGENCY_RECOVERY.jsonl`.
    #[serde(rename = "_emergency", default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<bool>,

    #[serde(
        rename = "_emergency_timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub emergency_timestamp: Option<String>,
}

impl ActionEnvelope {
    /// Build a new, unsealed envelope. Callers fill in the optional fields
    /// they need via the builder-style setters before handing it to
    /// `StreamWriter::append`.
    pub fn new(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        action_type: impl Into<ActionType>,
        severity: Severity,
        platform: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sequence: None,
            timestamp: timestamp.into(),
            action_type: action_type.into(),
            severity,
            platform: platform.into(),
            description: description.into(),
            tool_name: None,
            tool_params: None,
            session_id: None,
            parent_action_id: None,
            metadata: None,
            integrity: None,
            emergency: None,
            emergency_timestamp: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, params: Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_params = Some(params);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_parent(mut self, parent_action_id: impl Into<String>) -> Self {
        self.parent_action_id = Some(parent_action_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The first line of every stream file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHeader {
    #[serde(rename = "_header")]
    pub header: bool,
    pub schema_version: String,
    pub created: String,
    pub integrity_enabled: bool,
}

impl StreamHeader {
    pub const SCHEMA_VERSION: &'static str = "1.0.0";

    pub fn new(created: impl Into<String>, integrity_enabled: bool) -> Self {
        Self {
            header: true,
            schema_version: Self::SCHEMA_VERSION.to_string(),
            created: created.into(),
            integrity_enabled,
        }
    }
}

/// Persisted in `.state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub sequence: u64,
    #[serde(rename = "lastHash")]
    pub last_hash: Option<String>,
}
