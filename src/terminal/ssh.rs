// ABOUTME: SSH terminal-proxy variant - `ssh -tt host -- tmux new-session -A` for remote-hosted windows
// Command-channel calls (switch/kill/list-clients) go through the host's RemoteTmuxAdapter, not this child

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::warn;

use super::ProxyBackend;
use crate::error::AppError;
use crate::tmux::TmuxAdapter;

pub struct SshBackend {
    /// The `RemoteTmuxAdapter` for this host, used for command-channel calls.
    adapter: Arc<dyn TmuxAdapter>,
    host: String,
    ssh_opts: Vec<String>,
    helper_session: String,
    tty_discovery_timeout: Duration,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<tokio::process::ChildStdin>>>,
    client_tty: Arc<RwLock<Option<String>>>,
}

impl SshBackend {
    pub fn new(
        adapter: Arc<dyn TmuxAdapter>,
        host: String,
        ssh_opts: Vec<String>,
        helper_session: String,
        tty_discovery_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            host,
            ssh_opts,
            helper_session,
            tty_discovery_timeout,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            client_tty: Arc::new(RwLock::new(None)),
        }
    }

    /// A freshly created grouped session has exactly one client once the
    /// `ssh -tt` attach lands; wait for `list-clients` to report it.
    async fn discover_client_tty(&self) -> Result<String, AppError> {
        let deadline = tokio::time::Instant::now() + self.tty_discovery_timeout;
        loop {
            let clients = self
                .adapter
                .list_clients(&self.helper_session)
                .await
                .unwrap_or_default();
            if let Some(entry) = clients.into_iter().next() {
                return Ok(entry.tty);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::TtyDiscoveryTimeout);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

#[async_trait]
impl ProxyBackend for SshBackend {
    async fn attach(&self, output_tx: mpsc::Sender<Vec<u8>>) -> Result<(), AppError> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-tt");
        for opt in &self.ssh_opts {
            cmd.arg(opt);
        }
        cmd.arg(&self.host)
            .arg("--")
            .arg("tmux")
            .arg("new-session")
            .arg("-A")
            .arg("-s")
            .arg(&self.helper_session)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| AppError::TmuxAttachFailed(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| AppError::TmuxAttachFailed("no stdin".into()))?;
        let mut stdout = child.stdout.take().ok_or_else(|| AppError::TmuxAttachFailed("no stdout".into()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let tty = self.discover_client_tty().await?;
        *self.client_tty.write().await = Some(tty);
        Ok(())
    }

    async fn raw_switch(&self, target: &str) -> Result<(), AppError> {
        let tty = self.client_tty.read().await.clone().ok_or(AppError::NotReady)?;
        self.adapter
            .switch_client(&tty, target)
            .await
            .map_err(|e| AppError::TmuxSwitchFailed(e.to_string()))
    }

    async fn raw_write(&self, data: &[u8]) -> Result<(), AppError> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => stdin
                .write_all(data)
                .await
                .map_err(|e| AppError::Internal(e.to_string())),
            None => Err(AppError::NotReady),
        }
    }

    async fn raw_resize(&self, cols: u16, rows: u16) -> Result<(), AppError> {
        self.adapter
            .resize_window(&self.helper_session, cols, rows)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn raw_dispose(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Err(e) = self.adapter.kill_session(&self.helper_session).await {
            warn!(host = %self.host, session = %self.helper_session, error = %e, "failed to kill ssh helper session");
        }
    }

    fn mode(&self) -> &'static str {
        "ssh"
    }
}
