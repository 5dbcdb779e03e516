// ABOUTME: Pipe-pane/control-mode terminal-proxy variant - used when the server has no controlling tty
// Drives tmux's `-C` line protocol; writes go through `send-keys -l` since there's no client tty to type into

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{unescape_control_mode, ProxyBackend};
use crate::error::AppError;
use crate::tmux::TmuxAdapter;

pub struct PipePaneBackend {
    adapter: Arc<dyn TmuxAdapter>,
    base_session: String,
    helper_session: String,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<tokio::process::ChildStdin>>>,
    current_target: Arc<Mutex<Option<String>>>,
    original_size: Arc<Mutex<Option<(u16, u16)>>>,
}

impl PipePaneBackend {
    pub fn new(adapter: Arc<dyn TmuxAdapter>, base_session: String, helper_session: String) -> Self {
        Self {
            adapter,
            base_session,
            helper_session,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            current_target: Arc::new(Mutex::new(None)),
            original_size: Arc::new(Mutex::new(None)),
        }
    }

    /// Queries the helper session's current pane size via `#{pane_width}
    /// #{pane_height}`, used to restore the client's window on dispose.
    async fn capture_original_size(&self) {
        let Ok(out) = self
            .adapter
            .display_message(&self.helper_session, "#{pane_width} #{pane_height}")
            .await
        else {
            return;
        };
        let mut parts = out.trim().split_whitespace();
        let (Some(w), Some(h)) = (parts.next(), parts.next()) else {
            return;
        };
        if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
            *self.original_size.lock().await = Some((w, h));
        }
    }

    async fn send_control_command(&self, line: &str) -> Result<(), AppError> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => stdin
                .write_all(format!("{line}\n").as_bytes())
                .await
                .map_err(|e| AppError::Internal(e.to_string())),
            None => Err(AppError::NotReady),
        }
    }
}

#[async_trait]
impl ProxyBackend for PipePaneBackend {
    async fn attach(&self, output_tx: mpsc::Sender<Vec<u8>>) -> Result<(), AppError> {
        self.adapter
            .new_grouped_session(&self.base_session, &self.helper_session)
            .await
            .map_err(|e| AppError::SessionCreateFailed(e.to_string()))?;

        let mut child = Command::new("tmux")
            .args(["-C", "attach", "-t", &self.helper_session])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::TmuxAttachFailed(e.to_string()))?;

        let stdin = child.stdin.take().ok_or_else(|| AppError::TmuxAttachFailed("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| AppError::TmuxAttachFailed("no stdout".into()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.capture_original_size().await;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(rest) = line.strip_prefix("%output ") {
                            // `%output %<pane-id> <escaped-text>`
                            if let Some((_, payload)) = rest.split_once(' ') {
                                let bytes = unescape_control_mode(payload);
                                if output_tx.send(bytes).await.is_err() {
                                    break;
                                }
                            }
                        }
                        // %begin/%end/%exit and other control lines are
                        // acknowledgements we don't act on here.
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "pipe-pane control channel read error");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn raw_switch(&self, target: &str) -> Result<(), AppError> {
        self.send_control_command(&format!("select-window -t {target}")).await?;
        *self.current_target.lock().await = Some(target.to_string());
        Ok(())
    }

    async fn raw_write(&self, data: &[u8]) -> Result<(), AppError> {
        let target = self
            .current_target
            .lock()
            .await
            .clone()
            .ok_or(AppError::NotReady)?;
        let text = String::from_utf8_lossy(data).to_string();
        self.adapter
            .send_keys(&target, &text)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn raw_resize(&self, cols: u16, rows: u16) -> Result<(), AppError> {
        self.send_control_command(&format!("refresh-client -C {cols},{rows}")).await
    }

    async fn raw_dispose(&self) {
        if let Some((cols, rows)) = *self.original_size.lock().await {
            let _ = self
                .send_control_command(&format!("refresh-client -C {cols},{rows}"))
                .await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Err(e) = self.adapter.kill_session(&self.helper_session).await {
            warn!(session = %self.helper_session, error = %e, "failed to kill pipe-pane helper session");
        }
    }

    fn mode(&self) -> &'static str {
        "pipe-pane"
    }
}
