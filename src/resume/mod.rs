// ABOUTME: Resume/kill manager - revives an inactive AgentSession by launching its resume command
// Waits for the registry to correlate the reborn window before acknowledging (§4.10)

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::registry::{PresentationSession, RegistryEvent, RegistryHandle};
use crate::store::{AgentSessionPatch, AgentType, Store};
use crate::tmux::TmuxAdapter;

pub struct ResumeManager {
    store: Store,
    adapter: std::sync::Arc<dyn TmuxAdapter>,
    registry: RegistryHandle,
    tmux_session: String,
    claude_resume_cmd: String,
    codex_resume_cmd: String,
    correlation_timeout: Duration,
}

impl ResumeManager {
    pub fn new(
        store: Store,
        adapter: std::sync::Arc<dyn TmuxAdapter>,
        registry: RegistryHandle,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            registry,
            tmux_session: config.tmux_session.clone(),
            claude_resume_cmd: config.claude_resume_cmd.clone(),
            codex_resume_cmd: config.codex_resume_cmd.clone(),
            correlation_timeout: config.resume_correlation_timeout,
        }
    }

    fn build_command(&self, agent_type: AgentType, session_id: &str) -> String {
        let template = match agent_type {
            AgentType::Claude => &self.claude_resume_cmd,
            AgentType::Codex => &self.codex_resume_cmd,
        };
        template.replace("{sessionId}", session_id)
    }

    /// (a) look up, (b) reject if already active, (c) build the resume
    /// command, (d) spawn the window, (e) wait for the next registry tick to
    /// correlate it, (f) reply ok/err and clean up on failure.
    pub async fn resume(&self, session_id: &str) -> Result<PresentationSession, AppError> {
        let record = self
            .store
            .get_session_by_id(session_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or(AppError::NotFound)?;

        if record.current_window.is_some() {
            return Err(AppError::AlreadyActive);
        }

        let command = self.build_command(record.agent_type, session_id);
        let mut events = self.registry.subscribe();

        let target = self
            .adapter
            .new_window(&self.tmux_session, &record.project_path, &command)
            .await
            .map_err(|e| AppError::ResumeFailed(e.to_string()))?;

        self.registry.hint_new_window(target.clone()).await;
        info!(session_id, target = %target, "resume: spawned window, waiting for correlation");

        let result = tokio::time::timeout(self.correlation_timeout, async {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::SessionUpdate(session))
                    | Ok(RegistryEvent::SessionCreated(session)) => {
                        // Usually the matcher correlates by sessionId, but a
                        // renamed log on resume can surface a different
                        // agentSessionId; the window was just spawned
                        // exclusively for this resume, so a correlated
                        // session on our target window is sufficient too.
                        if session.tmux_window == target && session.agent_session_id.is_some() {
                            return Some(session);
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;

        match result {
            Ok(Some(session)) => Ok(session),
            _ => {
                warn!(session_id, target = %target, "resume: correlation timed out");
                let _ = self
                    .store
                    .update_session(
                        session_id,
                        AgentSessionPatch {
                            last_resume_error: Some(Some("correlation timed out".to_string())),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = self.adapter.kill_window(&target).await;
                Err(AppError::ResumeFailed("correlation timed out".to_string()))
            }
        }
    }

    /// Kills the tmux window backing a session. Surfaces `NotFound` if the
    /// session has no live window so the caller can emit `kill-failed`.
    pub async fn kill(&self, session_id: &str) -> Result<(), AppError> {
        let record = self
            .store
            .get_session_by_id(session_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or(AppError::NotFound)?;

        let target = record.current_window.ok_or(AppError::NotFound)?;
        self.adapter
            .kill_window(&target)
            .await
            .map_err(|e| AppError::ResumeFailed(e.to_string()))
    }
}
