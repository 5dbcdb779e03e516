// ABOUTME: The enriched record the log scanner produces for each candidate JSONL file

use chrono::{DateTime, Utc};

use crate::store::AgentType;

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedLogEntry {
    pub log_path: String,
    pub session_id: String,
    pub project_path: String,
    pub agent_type: AgentType,
    pub last_activity_at_from_mtime: DateTime<Utc>,
    pub last_user_message: Option<String>,
    pub last_known_log_size: u64,
    pub is_codex_subagent: bool,
    /// Up to the last few user messages, oldest first — used by the matcher
    /// to search scrollback for an ordered subsequence.
    pub recent_user_messages: Vec<String>,
}
