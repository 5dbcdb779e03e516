// ABOUTME: PTY terminal-proxy variant - `tmux attach` given a real pty, used when the server has a local controlling tty
// Client TTY discovery polls `list-clients` for the attaching child's pid (§4.8)

use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::ProxyBackend;
use crate::error::AppError;
use crate::tmux::TmuxAdapter;

pub struct PtyBackend {
    adapter: Arc<dyn TmuxAdapter>,
    base_session: String,
    helper_session: String,
    tty_discovery_timeout: Duration,
    master: Arc<StdMutex<Option<Box<dyn MasterPty + Send>>>>,
    writer: Arc<StdMutex<Option<Box<dyn Write + Send>>>>,
    child: Arc<StdMutex<Option<Box<dyn Child + Send + Sync>>>>,
    client_tty: Arc<RwLock<Option<String>>>,
}

impl PtyBackend {
    pub fn new(
        adapter: Arc<dyn TmuxAdapter>,
        base_session: String,
        helper_session: String,
        tty_discovery_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            base_session,
            helper_session,
            tty_discovery_timeout,
            master: Arc::new(StdMutex::new(None)),
            writer: Arc::new(StdMutex::new(None)),
            child: Arc::new(StdMutex::new(None)),
            client_tty: Arc::new(RwLock::new(None)),
        }
    }

    async fn discover_client_tty(&self, pid: u32) -> Result<String, AppError> {
        let deadline = tokio::time::Instant::now() + self.tty_discovery_timeout;
        loop {
            let clients = self
                .adapter
                .list_clients(&self.helper_session)
                .await
                .unwrap_or_default();
            if let Some(entry) = clients.into_iter().find(|c| c.pid == pid) {
                return Ok(entry.tty);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::TtyDiscoveryTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[async_trait]
impl ProxyBackend for PtyBackend {
    async fn attach(&self, output_tx: mpsc::Sender<Vec<u8>>) -> Result<(), AppError> {
        self.adapter
            .new_grouped_session(&self.base_session, &self.helper_session)
            .await
            .map_err(|e| AppError::SessionCreateFailed(e.to_string()))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AppError::TmuxAttachFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new("tmux");
        cmd.args(["attach", "-t", &self.helper_session]);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| AppError::TmuxAttachFailed(e.to_string()))?;
        let pid = child.process_id().unwrap_or(0);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| AppError::TmuxAttachFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| AppError::TmuxAttachFailed(e.to_string()))?;

        *self.writer.lock().unwrap() = Some(writer);
        *self.child.lock().unwrap() = Some(child);
        *self.master.lock().unwrap() = Some(pair.master);

        std::thread::Builder::new()
            .name(format!("agentboard-pty-{}", self.helper_session))
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "pty reader stopped");
                            break;
                        }
                    }
                }
            })
            .expect("spawn pty reader thread");

        let tty = self.discover_client_tty(pid).await?;
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
        let mut guard = self.writer.lock().unwrap();
        match guard.as_mut() {
            Some(w) => w
                .write_all(data)
                .map_err(|e| AppError::Internal(e.to_string())),
            None => Err(AppError::NotReady),
        }
    }

    async fn raw_resize(&self, cols: u16, rows: u16) -> Result<(), AppError> {
        let guard = self.master.lock().unwrap();
        match guard.as_ref() {
            Some(master) => master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| AppError::Internal(e.to_string())),
            None => Ok(()),
        }
    }

    async fn raw_dispose(&self) {
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();
        }
        if let Err(e) = self.adapter.kill_session(&self.helper_session).await {
            warn!(session = %self.helper_session, error = %e, "failed to kill pty helper session");
        }
    }

    fn mode(&self) -> &'static str {
        "pty"
    }
}
