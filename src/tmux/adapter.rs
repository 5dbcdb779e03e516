// ABOUTME: TmuxAdapter trait plus the local (direct-shellout) implementation
// Every call maps to one `tmux` invocation and parses its stable delimiter-separated output

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::TmuxError;
use super::types::{ClientEntry, Window, WindowSource};

/// Delimiter used in every `tmux -F` format string. Chosen to be extremely
/// unlikely to appear in a window/session name.
const FIELD_SEP: &str = "\u{1f}";

/// Common surface shared by the local and SSH-remote adapters. All calls are
/// `async` so callers never block the scheduler thread, but each individual
/// invocation is still a single synchronous subprocess round trip.
#[async_trait]
pub trait TmuxAdapter: Send + Sync {
    /// List windows for each `(session_name, source)` pair. The caller
    /// (session registry) decides which sessions are "managed" (the base
    /// session) versus "external" (discovery-prefixed).
    async fn list_windows(&self, sessions: &[(String, WindowSource)])
        -> Result<Vec<Window>, TmuxError>;

    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String, TmuxError>;

    async fn display_message(&self, target: &str, format: &str) -> Result<String, TmuxError>;

    async fn new_window(
        &self,
        session: &str,
        cwd: &str,
        command: &str,
    ) -> Result<String, TmuxError>;

    async fn kill_window(&self, target: &str) -> Result<(), TmuxError>;

    /// Kills a helper session by name, used by terminal proxy `dispose()`.
    async fn kill_session(&self, session: &str) -> Result<(), TmuxError>;

    /// `send-keys -l`, the literal (non-lookup) write path used by the
    /// pipe-pane terminal proxy variant, which has no controlling tty to
    /// write to directly.
    async fn send_keys(&self, target: &str, data: &str) -> Result<(), TmuxError>;

    async fn rename_window(&self, target: &str, name: &str) -> Result<(), TmuxError>;

    async fn resize_window(&self, target: &str, cols: u16, rows: u16) -> Result<(), TmuxError>;

    async fn switch_client(&self, client_tty: &str, target: &str) -> Result<(), TmuxError>;

    async fn list_clients(&self, session: &str) -> Result<Vec<ClientEntry>, TmuxError>;

    async fn has_session(&self, session: &str) -> Result<bool, TmuxError>;

    async fn new_session(&self, session: &str) -> Result<(), TmuxError>;

    /// Grouped session sharing `base_session`'s windows — the helper-session
    /// trick the terminal proxy variants attach a throwaway client to.
    async fn new_grouped_session(&self, base_session: &str, helper_session: &str) -> Result<(), TmuxError>;

    async fn list_sessions(&self) -> Result<Vec<String>, TmuxError>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalTmuxAdapter;

impl LocalTmuxAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> Result<tokio::process::Output, TmuxError> {
        debug!(args = ?args, "tmux exec");
        Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| TmuxError::SpawnFailed(e.to_string()))
    }

    async fn run_ok(&self, args: &[&str]) -> Result<String, TmuxError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(TmuxError::from_tokio_output(
                format!("tmux {}", args.join(" ")),
                &output,
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn parse_epoch(raw: &str) -> DateTime<Utc> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

fn parse_window_line(line: &str, source: WindowSource, host: Option<&str>) -> Option<Window> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() < 5 {
        warn!(line, "unparsable tmux window line");
        return None;
    }
    Some(Window {
        tmux_target: format!("{}:{}", fields[0], fields[1]),
        session_name: fields[0].to_string(),
        window_name: fields[2].to_string(),
        last_activity_at: parse_epoch(fields[3]),
        created_at: parse_epoch(fields[4]),
        source,
        host: host.map(str::to_string),
    })
}

pub fn window_format() -> String {
    format!(
        "#{{session_name}}{FIELD_SEP}#{{window_index}}{FIELD_SEP}#{{window_name}}{FIELD_SEP}#{{window_activity}}{FIELD_SEP}#{{session_created}}"
    )
}

pub fn parse_list_windows_output(
    output: &str,
    source: WindowSource,
    host: Option<&str>,
) -> Vec<Window> {
    output
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|l| parse_window_line(l, source, host))
        .collect()
}

pub fn parse_list_clients_output(output: &str) -> Vec<ClientEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let tty = parts.next()?.to_string();
            let pid = parts.next()?.parse().ok()?;
            Some(ClientEntry { tty, pid })
        })
        .collect()
}

#[async_trait]
impl TmuxAdapter for LocalTmuxAdapter {
    async fn list_windows(
        &self,
        sessions: &[(String, WindowSource)],
    ) -> Result<Vec<Window>, TmuxError> {
        let fmt = window_format();
        let mut windows = Vec::new();
        for (session, source) in sessions {
            let args = ["list-windows", "-t", session.as_str(), "-F", fmt.as_str()];
            match self.run_ok(&args).await {
                Ok(out) => windows.extend(parse_list_windows_output(&out, *source, None)),
                Err(e) => warn!(session, error = %e, "list-windows failed"),
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
            // No server running yet is not an error for our purposes.
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

    #[test]
    fn parses_window_line() {
        let fmt_output = format!("agentboard{FIELD_SEP}0{FIELD_SEP}claude{FIELD_SEP}1700000000{FIELD_SEP}1699999000");
        let windows = parse_list_windows_output(&fmt_output, WindowSource::Managed, None);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].tmux_target, "agentboard:0");
        assert_eq!(windows[0].window_name, "claude");
        assert_eq!(windows[0].source, WindowSource::Managed);
    }

    #[test]
    fn skips_malformed_lines() {
        let out = "too short\nfields";
        assert!(parse_list_windows_output(out, WindowSource::Managed, None).is_empty());
    }

    #[test]
    fn parses_client_list() {
        let out = "/dev/ttys001 1234\n/dev/ttys002 5678\n";
        let clients = parse_list_clients_output(out);
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].tty, "/dev/ttys001");
        assert_eq!(clients[0].pid, 1234);
    }
}
