// ABOUTME: Parser for Claude's persisted JSONL transcript files (~/.claude/projects/**/*.jsonl)
// Permissive: unknown fields are ignored, malformed lines are skipped rather than aborting the scan

use serde_json::Value;
use tracing::debug;

use crate::store::AgentType;

use super::types::ScannedLogEntry;

const TAIL_USER_MESSAGES: usize = 5;

/// Extract the text of a `message.content` field, which is either a plain
/// string or an array of `{type, text}` content blocks.
fn extract_message_text(message: &Value) -> Option<String> {
    let content = message.get("content")?;
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    if let Some(blocks) = content.as_array() {
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

struct ParsedLine {
    session_id: Option<String>,
    cwd: Option<String>,
    user_message: Option<String>,
}

fn parse_line(raw: &str) -> Option<ParsedLine> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let session_id = value.get("sessionId").and_then(Value::as_str).map(str::to_string);
    let cwd = value.get("cwd").and_then(Value::as_str).map(str::to_string);
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    let user_message = if event_type == "user" {
        value.get("message").and_then(extract_message_text)
    } else {
        None
    };
    Some(ParsedLine {
        session_id,
        cwd,
        user_message,
    })
}

/// Parse a Claude JSONL transcript's contents into a scanned log entry.
/// `log_path` and `log_size` are supplied by the caller (the scanner already
/// stat'd the file to decide whether to re-read it).
pub fn parse_claude_log(log_path: &str, contents: &str, log_size: u64) -> Option<ScannedLogEntry> {
    let mut session_id = None;
    let mut project_path = None;
    let mut user_messages = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(parsed) => {
                if session_id.is_none() {
                    session_id = parsed.session_id;
                }
                if project_path.is_none() {
                    project_path = parsed.cwd;
                }
                if let Some(msg) = parsed.user_message {
                    user_messages.push(msg);
                }
            }
            None => debug!(log_path, line_len = line.len(), "skipping malformed claude log line"),
        }
    }

    let session_id = session_id?;
    let project_path = project_path.unwrap_or_else(|| "/".to_string());
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
        agent_type: AgentType::Claude,
        last_activity_at_from_mtime: chrono::Utc::now(),
        last_user_message: user_messages.last().cloned(),
        last_known_log_size: log_size,
        is_codex_subagent: false,
        recent_user_messages: recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_id_cwd_and_last_user_message() {
        let contents = r#"{"sessionId":"abc123","cwd":"/tmp/alpha","type":"user","message":{"content":"hello there"}}
{"sessionId":"abc123","type":"assistant","message":{"content":[{"type":"text","text":"hi!"}]}}
{"sessionId":"abc123","type":"user","message":{"content":[{"type":"text","text":"second question"}]}}"#;

        let entry = parse_claude_log("/tmp/abc123.jsonl", contents, 123).unwrap();
        assert_eq!(entry.session_id, "abc123");
        assert_eq!(entry.project_path, "/tmp/alpha");
        assert_eq!(entry.last_user_message.as_deref(), Some("second question"));
        assert_eq!(entry.recent_user_messages.len(), 2);
    }

    #[test]
    fn skips_malformed_lines_without_aborting() {
        let contents = "not json at all\n{\"sessionId\":\"s1\",\"cwd\":\"/x\",\"type\":\"user\",\"message\":{\"content\":\"ok\"}}";
        let entry = parse_claude_log("/tmp/s1.jsonl", contents, 10).unwrap();
        assert_eq!(entry.session_id, "s1");
    }

    #[test]
    fn returns_none_when_no_session_id_found() {
        let contents = "{\"type\":\"user\",\"message\":{\"content\":\"hi\"}}";
        assert!(parse_claude_log("/tmp/none.jsonl", contents, 5).is_none());
    }
}
