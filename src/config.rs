// ABOUTME: Runtime configuration loaded from environment variables
// Central place all tunables (§6 of SPEC_FULL.md) are parsed with their defaults

use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    Auto,
    Pty,
    PipePane,
}

impl TerminalMode {
    fn parse(s: &str) -> Self {
        match s {
            "pty" => TerminalMode::Pty,
            "pipe-pane" => TerminalMode::PipePane,
            _ => TerminalMode::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub hostname: String,
    pub tmux_session: String,
    pub refresh_interval: Duration,
    pub discover_prefixes: Vec<String>,
    pub prune_ws_sessions: bool,
    pub terminal_mode: TerminalMode,
    pub terminal_monitor_targets: bool,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,

    pub log_poll_interval: Duration,
    pub log_poll_max: usize,
    pub rg_threads: usize,
    pub log_match_worker: bool,

    pub claude_config_dir: Option<String>,
    pub codex_home: Option<String>,
    pub claude_resume_cmd: String,
    pub codex_resume_cmd: String,

    pub remote_hosts: Vec<String>,
    pub remote_poll_interval: Duration,
    pub remote_timeout: Duration,
    pub remote_stale: Duration,
    pub remote_ssh_opts: Vec<String>,
    pub remote_allow_control: bool,

    pub inactive_max_age_hours_default: i64,
    pub working_window: Duration,
    pub idle_window: Duration,
    pub scrollback_lines: usize,
    pub resume_correlation_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let ssh_opts = env_string("AGENTBOARD_REMOTE_SSH_OPTS", "");
        Self {
            port: env_u64("PORT", 8420) as u16,
            hostname: env_string("HOSTNAME", "0.0.0.0"),
            tmux_session: env_string("TMUX_SESSION", "agentboard"),
            refresh_interval: Duration::from_millis(env_u64("REFRESH_INTERVAL_MS", 2_000)),
            discover_prefixes: env_csv("DISCOVER_PREFIXES"),
            prune_ws_sessions: env_bool("PRUNE_WS_SESSIONS", true),
            terminal_mode: TerminalMode::parse(&env_string("TERMINAL_MODE", "auto")),
            terminal_monitor_targets: env_bool("TERMINAL_MONITOR_TARGETS", false),
            tls_cert: std::env::var("TLS_CERT").ok(),
            tls_key: std::env::var("TLS_KEY").ok(),

            log_poll_interval: Duration::from_millis(env_u64("AGENTBOARD_LOG_POLL_MS", 5_000)),
            log_poll_max: env_usize("AGENTBOARD_LOG_POLL_MAX", 25),
            rg_threads: env_usize("AGENTBOARD_RG_THREADS", 4),
            log_match_worker: env_bool("AGENTBOARD_LOG_MATCH_WORKER", true),

            claude_config_dir: std::env::var("CLAUDE_CONFIG_DIR").ok(),
            codex_home: std::env::var("CODEX_HOME").ok(),
            claude_resume_cmd: env_string("CLAUDE_RESUME_CMD", "claude --resume {sessionId}"),
            codex_resume_cmd: env_string("CODEX_RESUME_CMD", "codex resume {sessionId}"),

            remote_hosts: env_csv("AGENTBOARD_REMOTE_HOSTS"),
            remote_poll_interval: Duration::from_millis(env_u64(
                "AGENTBOARD_REMOTE_POLL_MS",
                10_000,
            )),
            remote_timeout: Duration::from_millis(env_u64("AGENTBOARD_REMOTE_TIMEOUT_MS", 10_000)),
            remote_stale: Duration::from_millis(env_u64("AGENTBOARD_REMOTE_STALE_MS", 30_000)),
            remote_ssh_opts: ssh_opts
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            remote_allow_control: env_bool("AGENTBOARD_REMOTE_ALLOW_CONTROL", false),

            inactive_max_age_hours_default: 72,
            working_window: Duration::from_secs(3),
            idle_window: Duration::from_secs(10),
            scrollback_lines: 200,
            resume_correlation_timeout: Duration::from_secs(8),
        }
    }

    /// Default root for Claude's project logs, honoring `CLAUDE_CONFIG_DIR`.
    pub fn claude_projects_dir(&self) -> std::path::PathBuf {
        if let Some(dir) = &self.claude_config_dir {
            std::path::PathBuf::from(dir).join("projects")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".claude")
                .join("projects")
        }
    }

    /// Default root for Codex session logs, honoring `CODEX_HOME`.
    pub fn codex_sessions_dir(&self) -> std::path::PathBuf {
        if let Some(dir) = &self.codex_home {
            std::path::PathBuf::from(dir).join("sessions")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".codex")
                .join("sessions")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_mode_parses_known_values() {
        assert_eq!(TerminalMode::parse("pty"), TerminalMode::Pty);
        assert_eq!(TerminalMode::parse("pipe-pane"), TerminalMode::PipePane);
        assert_eq!(TerminalMode::parse("garbage"), TerminalMode::Auto);
    }
}
