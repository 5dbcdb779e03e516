// ABOUTME: Parser for Codex's persisted JSONL session files (~/.codex/sessions/**/*.jsonl)
// First line is session_meta; subsequent response_item lines carry {role, content}

use serde_json::Value;
use tracing::debug;

use crate::store::AgentType;

use super::types::ScannedLogEntry;

const TAIL_USER_MESSAGES: usize = 5;

fn extract_content_text(content: &Value) -> Option<String> {
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    if let Some(blocks) = content.as_array() {
        let text: String = blocks
            .iter()
            .filter_map(|b| {
                b.get("text")
                    .and_then(Value::as_str)
                    .or_else(|| b.as_str())
            })
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// True if `session_meta.source` is the `{subagent: ...}` variant rather than
/// a plain string.
fn is_subagent_source(meta: &Value) -> bool {
    meta.get("source")
        .map(|s| s.is_object())
        .unwrap_or(false)
}

pub fn parse_codex_log(log_path: &str, contents: &str, log_size: u64) -> Option<ScannedLogEntry> {
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

    let first = lines.next()?;
    let meta: Value = serde_json::from_str(first).ok()?;
    let header = meta.get("session_meta").unwrap_or(&meta);
    let session_id = header
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)?;
    let project_path = header
        .get("cwd")
        .and_then(Value::as_str)
        .unwrap_or("/")
        .to_string();
    let is_subagent = is_subagent_source(header);

    let mut user_messages = Vec::new();
    for line in lines {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(log_path, line_len = line.len(), "skipping malformed codex log line");
            continue;
        };
        let role = value.get("role").and_then(Value::as_str).unwrap_or("");
        if role == "user" {
            if let Some(content) = value.get("content") {
                if let Some(text) = extract_content_text(content) {
                    user_messages.push(text);
                }
            }
        }
    }

    let recent: Vec<String> = user_messages
        .iter()
        .rev()
        .take(TAIL_USER_MESSAGES)
        .rev()
        .cloned()
        .collect();

    Some(ScannedLogEntry {
        log_path: log_path.to_string(),
        session_id,
        project_path,
        agent_type: AgentType::Codex,
        last_activity_at_from_mtime: chrono::Utc::now(),
        last_user_message: user_messages.last().cloned(),
        last_known_log_size: log_size,
        is_codex_subagent: is_subagent,
        recent_user_messages: recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_meta_header_and_user_turns() {
        let contents = r#"{"session_meta":{"id":"cx-1","cwd":"/tmp/beta","source":"cli"}}
{"role":"user","content":"do the thing"}
{"role":"assistant","content":"done"}
{"role":"user","content":[{"type":"text","text":"and this"}]}"#;
        let entry = parse_codex_log("/tmp/cx-1.jsonl", contents, 50).unwrap();
        assert_eq!(entry.session_id, "cx-1");
        assert_eq!(entry.project_path, "/tmp/beta");
        assert!(!entry.is_codex_subagent);
        assert_eq!(entry.last_user_message.as_deref(), Some("and this"));
    }

    #[test]
    fn flat_session_meta_without_wrapper_key_also_parses() {
        let contents = r#"{"id":"cx-2","cwd":"/tmp/gamma","source":{"subagent":"reviewer"}}
{"role":"user","content":"hi"}"#;
        let entry = parse_codex_log("/tmp/cx-2.jsonl", contents, 10).unwrap();
        assert_eq!(entry.session_id, "cx-2");
        assert!(entry.is_codex_subagent);
    }

    #[test]
    fn missing_header_returns_none() {
        assert!(parse_codex_log("/tmp/empty.jsonl", "", 0).is_none());
    }
}
