// ABOUTME: Log-to-window matcher - correlates log files with live tmux windows by scanning scrollback
// Runs on a dedicated OS thread; the registry treats a superseded in-flight request's result as discarded

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::logs::ScannedLogEntry;
use crate::tmux::{TmuxAdapter, Window};

#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub windows: Vec<Window>,
    /// Windows already correlated to a session whose log hasn't grown.
    pub already_correlated: HashMap<String, String>, // tmux_target -> log_path
    pub logs: Vec<ScannedLogEntry>,
    pub scrollback_lines: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MatchResponse {
    pub match_skipped: bool,
    /// `log_path -> tmux_target` pairings.
    pub matches: Vec<(String, String)>,
}

/// Pure matching core, parameterized over how scrollback is fetched so it's
/// testable without a real tmux process (§8.6, "matcher skip").
pub fn match_windows<F>(request: &MatchRequest, mut capture_pane: F) -> MatchResponse
where
    F: FnMut(&str) -> String,
{
    let uncorrelated: Vec<&Window> = request
        .windows
        .iter()
        .filter(|w| !request.already_correlated.contains_key(&w.tmux_target))
        .collect();

    if uncorrelated.is_empty() && !request.already_correlated.is_empty() {
        debug!("matcher fast-path: all windows already correlated and stable");
        return MatchResponse {
            match_skipped: true,
            matches: Vec::new(),
        };
    }

    let mut matches = Vec::new();
    let mut logs_by_recency: Vec<&ScannedLogEntry> = request.logs.iter().filter(|l| !l.is_codex_subagent).collect();
    logs_by_recency.sort_by(|a, b| b.last_activity_at_from_mtime.cmp(&a.last_activity_at_from_mtime));

    for window in uncorrelated {
        let scrollback = capture_pane(&window.tmux_target);
        let prompt_glyph = prompt_glyph_for(&scrollback);

        let winner = logs_by_recency.iter().find(|log| {
            if log.recent_user_messages.is_empty() {
                return false;
            }
            scrollback_contains_ordered_subsequence(&scrollback, &log.recent_user_messages)
        });

        if let Some(log) = winner {
            debug!(target = %window.tmux_target, log = %log.log_path, glyph = ?prompt_glyph, "matched window to log");
            matches.push((log.log_path.clone(), window.tmux_target.clone()));
        }
    }

    MatchResponse {
        match_skipped: false,
        matches,
    }
}

/// Best-effort hint at which agent's prompt glyph ends the scrollback, used
/// only to break ties by agent type when more than one log could fit.
fn prompt_glyph_for(scrollback: &str) -> Option<&'static str> {
    if scrollback.contains('\u{276f}') {
        Some("claude")
    } else if scrollback.contains('\u{258c}') {
        Some("codex")
    } else {
        None
    }
}

/// True if each string in `messages`, in order, appears as a substring of
/// `scrollback` at strictly increasing positions.
fn scrollback_contains_ordered_subsequence(scrollback: &str, messages: &[String]) -> bool {
    let mut cursor = 0usize;
    for msg in messages {
        let trimmed = msg.trim();
        if trimmed.is_empty() {
            continue;
        }
        match scrollback[cursor..].find(trimmed) {
            Some(pos) => cursor += pos + trimmed.len(),
            None => return false,
        }
    }
    true
}

type PendingSlot = Arc<(Mutex<Option<PendingRequest>>, Condvar)>;

struct PendingRequest {
    request: MatchRequest,
    reply: oneshot::Sender<MatchResponse>,
}

/// Handle to the dedicated matcher thread. Cloning is cheap; all clones
/// share the same latest-wins request slot.
#[derive(Clone)]
pub struct MatcherHandle {
    slot: PendingSlot,
}

impl MatcherHandle {
    /// Spawn the worker thread. `adapter` is used to capture scrollback for
    /// uncorrelated windows.
    pub fn spawn(adapter: Arc<dyn TmuxAdapter>, scrollback_lines_default: usize) -> Self {
        let slot: PendingSlot = Arc::new((Mutex::new(None), Condvar::new()));
        let worker_slot = slot.clone();

        std::thread::Builder::new()
            .name("agentboard-matcher".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("matcher thread runtime");

                loop {
                    let pending = {
                        let (lock, cvar) = &*worker_slot;
                        let mut guard = lock.lock().unwrap();
                        while guard.is_none() {
                            guard = cvar.wait(guard).unwrap();
                        }
                        guard.take()
                    };
                    let Some(PendingRequest { request, reply }) = pending else {
                        continue;
                    };

                    let adapter = adapter.clone();
                    let response = runtime.block_on(async move {
                        let mut cache: HashMap<String, String> = HashMap::new();
                        let targets: Vec<String> = request
                            .windows
                            .iter()
                            .filter(|w| !request.already_correlated.contains_key(&w.tmux_target))
                            .map(|w| w.tmux_target.clone())
                            .collect();
                        for target in &targets {
                            let lines = if request.scrollback_lines == 0 {
                                scrollback_lines_default
                            } else {
                                request.scrollback_lines
                            };
                            let captured = adapter
                                .capture_pane(target, lines)
                                .await
                                .unwrap_or_default();
                            cache.insert(target.clone(), captured);
                        }
                        match_windows(&request, |target| {
                            cache.get(target).cloned().unwrap_or_default()
                        })
                    });

                    // Reply may fail if the registry already moved on; that's
                    // the "discard in-flight result" path and is not an error.
                    let _ = reply.send(response);
                }
            })
            .expect("spawn matcher thread");

        Self { slot }
    }

    /// Submit a request, overwriting any not-yet-picked-up pending one. The
    /// returned receiver resolves once the worker processes this exact
    /// request; if a newer request supersedes it before pickup, this
    /// receiver is dropped (its sender replaced) and resolves with an error,
    /// which callers treat as "discarded".
    pub fn submit(&self, request: MatchRequest) -> oneshot::Receiver<MatchResponse> {
        let (tx, rx) = oneshot::channel();
        let (lock, cvar) = &*self.slot;
        let mut guard = lock.lock().unwrap();
        *guard = Some(PendingRequest { request, reply: tx });
        cvar.notify_one();
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AgentType;
    use crate::tmux::types::WindowSource;
    use chrono::Utc;

    fn window(target: &str) -> Window {
        Window {
            tmux_target: target.to_string(),
            window_name: "claude".to_string(),
            session_name: "agentboard".to_string(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            source: WindowSource::Managed,
            host: None,
        }
    }

    fn log(path: &str, messages: &[&str]) -> ScannedLogEntry {
        ScannedLogEntry {
            log_path: path.to_string(),
            session_id: "s".to_string(),
            project_path: "/tmp".to_string(),
            agent_type: AgentType::Claude,
            last_activity_at_from_mtime: Utc::now(),
            last_user_message: messages.last().map(|s| s.to_string()),
            last_known_log_size: 0,
            is_codex_subagent: false,
            recent_user_messages: messages.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn matches_window_whose_scrollback_contains_ordered_messages() {
        let request = MatchRequest {
            windows: vec![window("agentboard:0")],
            already_correlated: HashMap::new(),
            logs: vec![log("/tmp/a.jsonl", &["fix the bug", "add a test"])],
            scrollback_lines: 200,
        };
        let response = match_windows(&request, |_| {
            "❯ fix the bug\nassistant: sure\n❯ add a test\n".to_string()
        });
        assert!(!response.match_skipped);
        assert_eq!(response.matches, vec![("/tmp/a.jsonl".to_string(), "agentboard:0".to_string())]);
    }

    #[test]
    fn skips_when_all_windows_already_correlated_and_stable() {
        let mut already = HashMap::new();
        already.insert("agentboard:0".to_string(), "/tmp/a.jsonl".to_string());
        let request = MatchRequest {
            windows: vec![window("agentboard:0")],
            already_correlated: already,
            logs: vec![log("/tmp/a.jsonl", &["hi"])],
            scrollback_lines: 200,
        };
        let response = match_windows(&request, |_| "should not be called".to_string());
        assert!(response.match_skipped);
        assert!(response.matches.is_empty());
    }

    #[test]
    fn out_of_order_messages_do_not_match() {
        let request = MatchRequest {
            windows: vec![window("agentboard:0")],
            already_correlated: HashMap::new(),
            logs: vec![log("/tmp/a.jsonl", &["second", "first"])],
            scrollback_lines: 200,
        };
        let response = match_windows(&request, |_| "❯ first\n❯ second\n".to_string());
        assert!(response.matches.is_empty());
    }
}
