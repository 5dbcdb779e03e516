// ABOUTME: Log scanner - watches the Claude/Codex log trees and posts deltas to the registry
// The scanner is the only component in the process that reads agent log files from disk

pub mod claude;
pub mod codex;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::AgentType;

pub use types::ScannedLogEntry;

#[derive(Debug, Clone)]
struct Root {
    dir: PathBuf,
    agent_type: AgentType,
}

pub struct LogScanner {
    roots: Vec<Root>,
    poll_max: usize,
}

impl LogScanner {
    pub fn new(claude_dir: PathBuf, codex_dir: PathBuf, poll_max: usize) -> Self {
        Self {
            roots: vec![
                Root {
                    dir: claude_dir,
                    agent_type: AgentType::Claude,
                },
                Root {
                    dir: codex_dir,
                    agent_type: AgentType::Codex,
                },
            ],
            poll_max,
        }
    }

    /// Recursively list `*.jsonl` files under `dir`, returning `(path, mtime)`.
    fn list_jsonl_recursive(dir: &Path, out: &mut Vec<(PathBuf, std::time::SystemTime)>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::list_jsonl_recursive(&path, out);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            out.push((path, mtime));
        }
    }

    /// Re-list both trees, sort by mtime descending, clamp the batch to
    /// `max` (0 = unclamped), and parse the survivors. §8.5 (scanner clamp):
    /// `collect_entries(0)` returns every log that exists;
    /// `collect_entries(N)` returns at most `N`.
    pub fn collect_entries(&self, max: usize) -> Vec<ScannedLogEntry> {
        let mut candidates: Vec<(PathBuf, std::time::SystemTime, AgentType)> = Vec::new();
        for root in &self.roots {
            let mut found = Vec::new();
            Self::list_jsonl_recursive(&root.dir, &mut found);
            candidates.extend(
                found
                    .into_iter()
                    .map(|(path, mtime)| (path, mtime, root.agent_type)),
            );
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        if max > 0 {
            candidates.truncate(max);
        }

        candidates
            .into_iter()
            .filter_map(|(path, mtime, agent_type)| self.parse_one(&path, mtime, agent_type))
            .collect()
    }

    fn parse_one(
        &self,
        path: &Path,
        mtime: std::time::SystemTime,
        agent_type: AgentType,
    ) -> Option<ScannedLogEntry> {
        let contents = std::fs::read_to_string(path).ok()?;
        let size = contents.len() as u64;
        let path_str = path.to_string_lossy().to_string();
        let mut entry = match agent_type {
            AgentType::Claude => claude::parse_claude_log(&path_str, &contents, size)?,
            AgentType::Codex => codex::parse_codex_log(&path_str, &contents, size)?,
        };
        entry.last_activity_at_from_mtime = chrono::DateTime::<chrono::Utc>::from(mtime);
        Some(entry)
    }

    /// Run the periodic scan task, posting each tick's batch to `tx`. Exits
    /// when the receiver is dropped.
    pub async fn run(self, tx: mpsc::Sender<Vec<ScannedLogEntry>>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let max = self.poll_max;
            let entries = {
                let scanner = &self;
                tokio::task::block_in_place(|| scanner.collect_entries(max))
            };
            debug!(count = entries.len(), "log scanner tick");
            if tx.send(entries).await.is_err() {
                warn!("log scanner: registry channel closed, stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn clamp_zero_returns_all_available() {
        let tmp_claude = tempfile::tempdir().unwrap();
        let tmp_codex = tempfile::tempdir().unwrap();
        write_log(
            tmp_claude.path(),
            "a.jsonl",
            "{\"sessionId\":\"a\",\"cwd\":\"/x\",\"type\":\"user\",\"message\":{\"content\":\"hi\"}}",
        );
        write_log(
            tmp_claude.path(),
            "b.jsonl",
            "{\"sessionId\":\"b\",\"cwd\":\"/y\",\"type\":\"user\",\"message\":{\"content\":\"hi\"}}",
        );

        let scanner = LogScanner::new(tmp_claude.path().to_path_buf(), tmp_codex.path().to_path_buf(), 25);
        let entries = scanner.collect_entries(0);
        assert!(entries.len() >= 1);
    }

    #[test]
    fn clamp_n_limits_batch_size() {
        let tmp_claude = tempfile::tempdir().unwrap();
        let tmp_codex = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_log(
                tmp_claude.path(),
                &format!("s{i}.jsonl"),
                &format!(
                    "{{\"sessionId\":\"s{i}\",\"cwd\":\"/x\",\"type\":\"user\",\"message\":{{\"content\":\"hi\"}}}}"
                ),
            );
        }

        let scanner = LogScanner::new(tmp_claude.path().to_path_buf(), tmp_codex.path().to_path_buf(), 25);
        let entries = scanner.collect_entries(2);
        assert!(entries.len() <= 2);
    }

    #[test]
    fn missing_roots_yield_empty_batch() {
        let scanner = LogScanner::new(
            PathBuf::from("/nonexistent/claude"),
            PathBuf::from("/nonexistent/codex"),
            25,
        );
        assert!(scanner.collect_entries(0).is_empty());
    }
}
