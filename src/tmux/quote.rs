// ABOUTME: Shell-quoting rule used for every argument that crosses an ssh shell boundary
// Safe-set characters pass through unquoted; everything else is single-quoted per POSIX rules

/// Characters that may appear unquoted in a remote shell command.
fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@' | '+' | '=')
}

/// Quote `s` for safe inclusion in a shell command line, e.g. as part of an
/// `ssh host -- tmux <args>` invocation. Strings made up entirely of the safe
/// set pass through unquoted; anything else is wrapped in single quotes with
/// embedded apostrophes escaped as `'\''`.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(is_safe_char) {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Quote a full argv for a remote shell, joining with spaces.
pub fn shell_quote_args<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_chars_pass_through() {
        assert_eq!(shell_quote("session_1:0.name-v2"), "session_1:0.name-v2");
    }

    #[test]
    fn empty_string_is_quoted() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn spaces_get_quoted() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
    }

    #[test]
    fn embedded_apostrophe_escaped() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn round_trip_through_bash() {
        // Mirrors property §8.7: echo <shellQuote(s)> through bash -c yields s.
        for s in [
            "plain",
            "has space",
            "quote's here",
            "semi;colon",
            "dollar$var",
            "new\nline",
            "",
            "a'b'c",
        ] {
            let quoted = shell_quote(s);
            let cmd = format!("printf '%s' {quoted}");
            let output = std::process::Command::new("bash")
                .arg("-c")
                .arg(&cmd)
                .output();
            if let Ok(output) = output {
                assert_eq!(String::from_utf8_lossy(&output.stdout), s, "quoted={quoted}");
            }
        }
    }

    #[test]
    fn quote_args_joins_with_spaces() {
        assert_eq!(
            shell_quote_args(["tmux", "new-window", "hello world"]),
            "tmux new-window 'hello world'"
        );
    }
}
