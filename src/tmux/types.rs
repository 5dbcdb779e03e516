// ABOUTME: Typed results of tmux adapter queries
// Window identity is the tmuxTarget (base session : window index) within a host

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowSource {
    Managed,
    External,
}

/// A tmux window as enumerated on the most recent poll tick. Transient —
/// recomputed from `tmux list-windows` every tick, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// `session:index`, e.g. `agentboard:3`. Identity within a host.
    pub tmux_target: String,
    pub window_name: String,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub source: WindowSource,
    /// Set for windows discovered on a remote host via SSH adapters.
    pub host: Option<String>,
}

impl Window {
    /// Fully-qualified identity across hosts: `host#target` or just `target`.
    pub fn identity(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}#{}", self.tmux_target),
            None => self.tmux_target.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub tty: String,
    pub pid: u32,
}
