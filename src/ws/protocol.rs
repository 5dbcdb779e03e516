// ABOUTME: Wire types for the `/ws` protocol (§6) - one `type`-tagged JSON object per frame
// Unknown message types are logged and dropped, never fatal (§7)

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::registry::PresentationSession;

pub fn encode_terminal_bytes(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_terminal_bytes(data: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    TerminalAttach {
        session_id: String,
        tmux_target: Option<String>,
        cols: u16,
        rows: u16,
    },
    TerminalDetach {
        session_id: String,
    },
    TerminalInput {
        session_id: String,
        data: String,
    },
    TerminalResize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    SessionCreate {
        project_path: String,
        command: String,
    },
    SessionKill {
        session_id: String,
    },
    SessionRename {
        session_id: String,
        name: String,
    },
    SessionRefresh,
    SessionResume {
        session_id: String,
    },
    SessionPin {
        session_id: String,
        is_pinned: bool,
    },
    TmuxCheckCopyMode {
        session_id: String,
    },
    TmuxCancelCopyMode {
        session_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Sessions {
        sessions: Vec<PresentationSession>,
    },
    SessionUpdate {
        session: PresentationSession,
    },
    SessionCreated {
        session: PresentationSession,
    },
    SessionRemoved {
        session_id: String,
    },
    AgentSessions {
        active: Vec<PresentationSession>,
        inactive: Vec<PresentationSession>,
    },
    SessionOrphaned {
        session: PresentationSession,
    },
    SessionActivated {
        session_id: String,
    },
    SessionResumeResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<PresentationSession>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    SessionPinResult {
        session_id: String,
        is_pinned: bool,
    },
    SessionResurrectionFailed {
        session_id: String,
        error: WireError,
    },
    TerminalOutput {
        session_id: String,
        data: String,
    },
    TerminalError {
        session_id: String,
        error: WireError,
    },
    TerminalReady {
        session_id: String,
    },
    TmuxCopyModeStatus {
        session_id: String,
        active: bool,
    },
    Error {
        error: WireError,
    },
    KillFailed {
        session_id: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_attach_parses_from_json() {
        let raw = r#"{"type":"terminal-attach","sessionId":"s1","tmuxTarget":null,"cols":120,"rows":40}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::TerminalAttach { session_id, cols, rows, .. } => {
                assert_eq!(session_id, "s1");
                assert_eq!(cols, 120);
                assert_eq!(rows, 40);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse_and_is_dropped_by_caller() {
        let raw = r#"{"type":"not-a-real-type"}"#;
        let msg: Result<ClientMessage, _> = serde_json::from_str(raw);
        assert!(msg.is_err());
    }

    #[test]
    fn terminal_bytes_round_trip_through_base64() {
        let original = b"\x1b[31mhello\x1b[0m\xff";
        let encoded = encode_terminal_bytes(original);
        let decoded = decode_terminal_bytes(&encoded);
        assert_eq!(decoded, original);
    }
}
