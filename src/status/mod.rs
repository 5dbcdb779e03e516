// ABOUTME: Status classifier - maps scrollback + recent log activity into working/waiting/permission/unknown
// Rules are evaluated top-down per §4.6; first match wins

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Working,
    Waiting,
    Permission,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Working => "working",
            Status::Waiting => "waiting",
            Status::Permission => "permission",
            Status::Unknown => "unknown",
        }
    }
}

lazy_static! {
    static ref PERMISSION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)do you want to").unwrap(),
        Regex::new(r"(?i)allow\s*\?").unwrap(),
    ];
    static ref THINKING_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)thinking").unwrap(),
        Regex::new(r"(?i)esc to interrupt").unwrap(),
        Regex::new(r"[⠀-⣿]").unwrap(), // braille spinner glyphs
    ];
    static ref PROMPT_GLYPH: Regex = Regex::new(r"[❯▌>]\s*$").unwrap();
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput {
    pub log_grew_within_working_window: bool,
    pub idle_for_at_least: Option<Duration>,
    pub working_window: Duration,
    pub idle_window: Duration,
}

/// Classify a window's status from its scrollback tail and recent log
/// activity. Evaluated top-down: permission > working > waiting > unknown.
pub fn classify(scrollback_tail: &str, input: ClassifierInput) -> Status {
    if PERMISSION_PATTERNS.iter().any(|re| re.is_match(scrollback_tail)) {
        return Status::Permission;
    }

    if input.log_grew_within_working_window
        || THINKING_PATTERNS.iter().any(|re| re.is_match(scrollback_tail))
    {
        return Status::Working;
    }

    let ends_at_prompt = PROMPT_GLYPH.is_match(scrollback_tail.trim_end());
    let idle_long_enough = input
        .idle_for_at_least
        .map(|d| d >= input.idle_window)
        .unwrap_or(false);
    if ends_at_prompt && idle_long_enough {
        return Status::Waiting;
    }

    Status::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> ClassifierInput {
        ClassifierInput {
            log_grew_within_working_window: false,
            idle_for_at_least: None,
            working_window: Duration::from_secs(3),
            idle_window: Duration::from_secs(10),
        }
    }

    #[test]
    fn permission_prompt_wins_over_everything() {
        let status = classify(
            "Do you want to proceed with this change?",
            ClassifierInput {
                log_grew_within_working_window: true,
                ..base_input()
            },
        );
        assert_eq!(status, Status::Permission);
    }

    #[test]
    fn codex_allow_prompt_detected() {
        let status = classify("Allow ?", base_input());
        assert_eq!(status, Status::Permission);
    }

    #[test]
    fn recent_log_growth_means_working() {
        let status = classify(
            "some scrollback without a prompt",
            ClassifierInput {
                log_grew_within_working_window: true,
                ..base_input()
            },
        );
        assert_eq!(status, Status::Working);
    }

    #[test]
    fn thinking_spinner_means_working() {
        let status = classify("Thinking...", base_input());
        assert_eq!(status, Status::Working);
    }

    #[test]
    fn idle_prompt_glyph_means_waiting() {
        let status = classify(
            "assistant: done\n❯ ",
            ClassifierInput {
                idle_for_at_least: Some(Duration::from_secs(15)),
                ..base_input()
            },
        );
        assert_eq!(status, Status::Waiting);
    }

    #[test]
    fn prompt_glyph_but_not_idle_long_enough_is_unknown() {
        let status = classify(
            "assistant: done\n❯ ",
            ClassifierInput {
                idle_for_at_least: Some(Duration::from_secs(2)),
                ..base_input()
            },
        );
        assert_eq!(status, Status::Unknown);
    }

    #[test]
    fn garbage_scrollback_is_unknown() {
        assert_eq!(classify("random noise", base_input()), Status::Unknown);
    }
}
