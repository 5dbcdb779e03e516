// ABOUTME: The presentation view merges a Window with its correlated AgentSession plus status
// This is the canonical JSON shape described in §6 of SPEC_FULL.md ("Session record shape")

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::status::Status;
use crate::store::{AgentSessionRecord, AgentType};
use crate::tmux::{Window, WindowSource};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresentationSession {
    pub id: String,
    pub name: String,
    pub tmux_window: String,
    pub project_path: String,
    pub status: &'static str,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<&'static str>,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

fn source_str(s: WindowSource) -> &'static str {
    match s {
        WindowSource::Managed => "managed",
        WindowSource::External => "external",
    }
}

fn agent_type_str(t: AgentType) -> &'static str {
    t.as_str()
}

impl PresentationSession {
    /// Build the view for a live (window, session) pair.
    pub fn from_window_and_session(
        window: &Window,
        session: Option<&AgentSessionRecord>,
        status: Status,
    ) -> Self {
        let id = session
            .map(|s| s.session_id.clone())
            .unwrap_or_else(|| window.identity());
        Self {
            id,
            name: window.window_name.clone(),
            tmux_window: window.tmux_target.clone(),
            project_path: session
                .map(|s| s.project_path.clone())
                .unwrap_or_default(),
            status: status.as_str(),
            last_activity: window.last_activity_at,
            created_at: window.created_at,
            agent_type: session.map(|s| agent_type_str(s.agent_type)),
            source: source_str(window.source),
            command: None,
            agent_session_id: session.map(|s| s.session_id.clone()),
            agent_session_name: session.map(|s| s.display_name.clone()),
            last_user_message: session.and_then(|s| s.last_user_message.clone()),
            is_pinned: session.map(|s| s.is_pinned),
            host: window.host.clone(),
        }
    }

    /// Build the view for an inactive (orphaned, no live window) session.
    pub fn from_inactive_session(session: &AgentSessionRecord) -> Self {
        Self {
            id: session.session_id.clone(),
            name: session.display_name.clone(),
            tmux_window: String::new(),
            project_path: session.project_path.clone(),
            status: Status::Unknown.as_str(),
            last_activity: session.last_activity_at,
            created_at: session.created_at,
            agent_type: Some(agent_type_str(session.agent_type)),
            source: "managed",
            command: None,
            agent_session_id: Some(session.session_id.clone()),
            agent_session_name: Some(session.display_name.clone()),
            last_user_message: session.last_user_message.clone(),
            is_pinned: Some(session.is_pinned),
            host: None,
        }
    }
}

/// Diff two presentation snapshots keyed by `id`. Returns (created, updated, removed_ids).
pub fn diff_sessions(
    previous: &[PresentationSession],
    current: &[PresentationSession],
) -> (Vec<PresentationSession>, Vec<PresentationSession>, Vec<String>) {
    use std::collections::HashMap;

    let prev_by_id: HashMap<&str, &PresentationSession> =
        previous.iter().map(|s| (s.id.as_str(), s)).collect();
    let curr_by_id: HashMap<&str, &PresentationSession> =
        current.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut created = Vec::new();
    let mut updated = Vec::new();
    for session in current {
        match prev_by_id.get(session.id.as_str()) {
            None => created.push(session.clone()),
            Some(prior) if *prior != session => updated.push(session.clone()),
            Some(_) => {}
        }
    }

    let removed = previous
        .iter()
        .filter(|s| !curr_by_id.contains_key(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect();

    (created, updated, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sess(id: &str, last_activity: DateTime<Utc>) -> PresentationSession {
        PresentationSession {
            id: id.to_string(),
            name: "n".into(),
            tmux_window: "agentboard:0".into(),
            project_path: "/tmp".into(),
            status: "working",
            last_activity,
            created_at: last_activity,
            agent_type: Some("claude"),
            source: "managed",
            command: None,
            agent_session_id: Some(id.to_string()),
            agent_session_name: None,
            last_user_message: None,
            is_pinned: Some(false),
            host: None,
        }
    }

    #[test]
    fn diff_detects_created_updated_removed() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let previous = vec![sess("a", t0), sess("b", t0)];
        let mut current = vec![sess("a", t0), sess("c", t0)];
        current[0].last_activity = t1; // "a" changed

        let (created, updated, removed) = diff_sessions(&previous, &current);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, "c");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "a");
        assert_eq!(removed, vec!["b".to_string()]);
    }
}
