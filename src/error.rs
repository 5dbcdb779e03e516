// ABOUTME: Top-level error taxonomy surfaced on the wire (§7 of SPEC_FULL.md)
// Every variant maps to one of the ERR_* codes the WebSocket/HTTP protocol documents

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid window target: {0}")]
    InvalidWindow(String),
    #[error("session create failed: {0}")]
    SessionCreateFailed(String),
    #[error("tmux attach failed: {0}")]
    TmuxAttachFailed(String),
    #[error("tmux switch failed: {0}")]
    TmuxSwitchFailed(String),
    #[error("tty discovery timed out")]
    TtyDiscoveryTimeout,
    #[error("terminal proxy not ready")]
    NotReady,
    #[error("proxy start timed out")]
    StartTimeout,
    #[error("remote command timed out")]
    RemoteTimeout,
    #[error("session not found")]
    NotFound,
    #[error("session already active")]
    AlreadyActive,
    #[error("resume failed: {0}")]
    ResumeFailed(String),
    #[error("invalid path")]
    InvalidPath,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    PathNotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidWindow(_) => "ERR_INVALID_WINDOW",
            AppError::SessionCreateFailed(_) => "ERR_SESSION_CREATE_FAILED",
            AppError::TmuxAttachFailed(_) => "ERR_TMUX_ATTACH_FAILED",
            AppError::TmuxSwitchFailed(_) => "ERR_TMUX_SWITCH_FAILED",
            AppError::TtyDiscoveryTimeout => "ERR_TTY_DISCOVERY_TIMEOUT",
            AppError::NotReady => "ERR_NOT_READY",
            AppError::StartTimeout => "ERR_START_TIMEOUT",
            AppError::RemoteTimeout => "ERR_REMOTE_TIMEOUT",
            AppError::NotFound => "NOT_FOUND",
            AppError::AlreadyActive => "ALREADY_ACTIVE",
            AppError::ResumeFailed(_) => "RESUME_FAILED",
            AppError::InvalidPath => "invalid_path",
            AppError::Forbidden => "forbidden",
            AppError::PathNotFound => "not_found",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether the client should see this as a transient, retryable failure
    /// (6-second banner) or a fatal one that tears the connection/proxy down.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AppError::TmuxSwitchFailed(_)
                | AppError::RemoteTimeout
                | AppError::NotReady
                | AppError::SessionCreateFailed(_)
        )
    }
}

#[derive(Debug, Serialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for WireError {
    fn from(err: &AppError) -> Self {
        WireError {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}
