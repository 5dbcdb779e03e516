// ABOUTME: SSH-wrapped tmux adapter - same TmuxAdapter surface, routed through `ssh host -- tmux ...`
// ControlMaster is forced off per-call; the long-running attach owns the multiplexed channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::adapter::{parse_list_clients_output, parse_list_windows_output, window_format};
use super::error::TmuxError;
use super::types::{ClientEntry, Window, WindowSource};

#[derive(Debug, Clone)]
pub struct RemoteTmuxAdapter {
    host: String,
    ssh_opts: Vec<String>,
    call_timeout: Duration,
    /// Result of the most recent `tmux list-sessions` liveness probe.
    reachable: Arc<AtomicBool>,
    last_probe: Arc<RwLock<std::time::Instant>>,
    stale_after: Duration,
}

impl RemoteTmuxAdapter {
    pub fn new(host: impl Into<String>, ssh_opts: Vec<String>, call_timeout: Duration, stale_after: Duration) -> Self {
        Self {
            host: host.into(),
            ssh_opts,
            call_timeout,
            reachable: Arc::new(AtomicBool::new(false)),
            last_probe: Arc::new(RwLock::new(std::time::Instant::now() - stale_after)),
            stale_after,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// True iff the last liveness probe succeeded within `remoteStaleMs`.
    pub async fn is_reachable(&self) -> bool {
        let age = self.last_probe.read().await.elapsed();
        self.reachable.load(Ordering::Relaxed) && age <= self.stale_after
    }

    /// Run `tmux list-sessions` with a short timeout, recording the result.
    pub async fn probe(&self) {
        let ok = timeout(self.call_timeout, self.run(&["list-sessions"]))
            .await
            .map(|r| r.map(|o| o.status.success()).unwrap_or(false))
            .unwrap_or(false);
        self.reachable.store(ok, Ordering::Relaxed);
        *self.last_probe.write().await = std::time::Instant::now();
    }

    async fn run(&self, tmux_args: &[&str]) -> Result<tokio::process::Output, TmuxError> {
        let quoted = super::quote::shell_quote_args(tmux_args);
        let remote_command = format!("tmux {quoted}");
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg("ControlMaster=no");
        for opt in &self.ssh_opts {
            cmd.arg(opt);
        }
        // ssh re-joins trailing argv elements with a single unescaped space
        // before handing them to the remote shell, so any per-arg quoting
        // done on our side is lost unless the whole command is one argv
        // element. Pass the already-quoted command line as a single arg.
        cmd.arg(&self.host).arg(&remote_command);
        debug!(host = %self.host, remote_command, "ssh tmux exec");

        let fut = cmd.output();
        match timeout(self.call_timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(TmuxError::SpawnFailed(e.to_string())),
            Err(_) => {
                warn!(host = %self.host, "ssh tmux call timed out, killing subprocess");
                Err(TmuxError::RemoteTimeout(self.call_timeout))
            }
        }
    }

    async fn run_ok(&self, args: &[&str]) -> Result<String, TmuxError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(TmuxError::from_tokio_output(
                format!("ssh {} tmux {}", self.host, args.join(" ")),
                &output,
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl super::adapter::TmuxAdapter for RemoteTmuxAdapter {
    async fn list_windows(
        &self,
        sessions: &[(String, WindowSource)],
    ) -> Result<Vec<Window>, TmuxError> {
        let fmt = window_format();
        let mut windows = Vec::new();
        for (session, source) in sessions {
            match self
                .run_ok(&["list-windows", "-t", session.as_str(), "-F", fmt.as_str()])
                .await
            {
                Ok(out) => windows.extend(parse_list_windows_output(&out, *source, Some(&self.host))),
                Err(e) => warn!(host = %self.host, session, error = %e, "remote list-windows failed"),
            }
        }
        Ok(windows)
    }

    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String, TmuxError> {
        let range = format!("-{lines}");
        self.run_ok(&["capture-pane", "-e", "-p", "-S", &range, "-t", target])
            .await
    }

    async fn display_message(&self, target: &str, format: &str) -> Result<String, TmuxError> {
        self.run_ok(&["display-message", "-p", "-t", target, format])
            .await
            .map(|s| s.trim_end_matches('\n').to_string())
    }

    async fn new_window(
        &self,
        session: &str,
        cwd: &str,
        command: &str,
    ) -> Result<String, TmuxError> {
        let out = self
            .run_ok(&[
                "new-window",
                "-P",
                "-F",
                "#{session_name}:#{window_index}",
                "-t",
                session,
                "-c",
                cwd,
                command,
            ])
            .await?;
        Ok(out.trim_end_matches('\n').to_string())
    }

    async fn kill_window(&self, target: &str) -> Result<(), TmuxError> {
        self.run_ok(&["kill-window", "-t", target]).await?;
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        self.run_ok(&["kill-session", "-t", session]).await?;
        Ok(())
    }

    async fn send_keys(&self, target: &str, data: &str) -> Result<(), TmuxError> {
        self.run_ok(&["send-keys", "-l", "-t", target, data]).await?;
        Ok(())
    }

    async fn rename_window(&self, target: &str, name: &str) -> Result<(), TmuxError> {
        self.run_ok(&["rename-window", "-t", target, name]).await?;
        Ok(())
    }

    async fn resize_window(&self, target: &str, cols: u16, rows: u16) -> Result<(), TmuxError> {
        self.run_ok(&[
            "resize-window",
            "-t",
            target,
            "-x",
            &cols.to_string(),
            "-y",
            &rows.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn switch_client(&self, client_tty: &str, target: &str) -> Result<(), TmuxError> {
        self.run_ok(&["switch-client", "-c", client_tty, "-t", target])
            .await?;
        Ok(())
    }

    async fn list_clients(&self, session: &str) -> Result<Vec<ClientEntry>, TmuxError> {
        let out = self
            .run_ok(&[
                "list-clients",
                "-t",
                session,
                "-F",
                "#{client_tty} #{client_pid}",
            ])
            .await?;
        Ok(parse_list_clients_output(&out))
    }

    async fn has_session(&self, session: &str) -> Result<bool, TmuxError> {
        let output = self.run(&["has-session", "-t", session]).await?;
        Ok(output.status.success())
    }

    async fn new_session(&self, session: &str) -> Result<(), TmuxError> {
        self.run_ok(&["new-session", "-d", "-s", session]).await?;
        Ok(())
    }

    async fn new_grouped_session(&self, base_session: &str, helper_session: &str) -> Result<(), TmuxError> {
        self.run_ok(&["new-session", "-d", "-t", base_session, "-s", helper_session])
            .await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, TmuxError> {
        let output = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_marks_unreachable_when_host_unresolvable() {
        let adapter = RemoteTmuxAdapter::new(
            "nonexistent.invalid.host.agentboard-test",
            vec![],
            Duration::from_millis(500),
            Duration::from_secs(30),
        );
        adapter.probe().await;
        assert!(!adapter.is_reachable().await);
    }
}
