// ABOUTME: Row types for the embedded store's `agent_sessions` and `app_settings` tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    Claude,
    Codex,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Codex => "codex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(AgentType::Claude),
            "codex" => Some(AgentType::Codex),
            _ => None,
        }
    }
}

/// One row of `agent_sessions`. Mirrors the `AgentSession` persisted entity
/// from §3 of SPEC_FULL.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSessionRecord {
    pub session_id: String,
    pub log_file_path: String,
    pub project_path: String,
    pub agent_type: AgentType,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// `None` means inactive/orphaned.
    pub current_window: Option<String>,
    pub last_user_message: Option<String>,
    pub is_pinned: bool,
    pub last_resume_error: Option<String>,
    pub last_known_log_size: Option<i64>,
    pub is_codex_exec: bool,
}

/// Patch applied via `updateSession`; `None` fields are left unchanged,
/// `Some(None)` clears a nullable column (used for `current_window`).
#[derive(Debug, Clone, Default)]
pub struct AgentSessionPatch {
    pub display_name: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub current_window: Option<Option<String>>,
    pub last_user_message: Option<Option<String>>,
    pub last_resume_error: Option<Option<String>>,
    pub last_known_log_size: Option<Option<i64>>,
}
