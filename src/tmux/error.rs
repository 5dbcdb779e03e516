// ABOUTME: Error type for tmux adapter invocations
// Every failed tmux/ssh invocation is wrapped once at the adapter boundary into this type

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TmuxError {
    #[error("tmux command failed (exit {exit_code:?}): {command} — {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to spawn tmux: {0}")]
    SpawnFailed(String),

    #[error("remote command timed out after {0:?}")]
    RemoteTimeout(std::time::Duration),

    #[error("unparsable tmux output: {0}")]
    ParseError(String),
}

impl TmuxError {
    /// Truncate stderr to 500 bytes, as required by §4.1.
    pub fn from_tokio_output(command: impl Into<String>, output: &tokio::process::Output) -> Self {
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.len() > 500 {
            stderr.truncate(500);
        }
        TmuxError::CommandFailed {
            command: command.into(),
            exit_code: output.status.code(),
            stderr,
        }
    }
}
