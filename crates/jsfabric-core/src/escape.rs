//! Command-line argument escaping.
//!
//! Child engine processes receive their bootstrap script inline, wrapped in
//! double quotes on the command line. The escaping below follows the
//! Windows argument-parsing convention (`CommandLineToArgvW` and the MSVC
//! runtime): backslashes are literal unless they precede a double quote, in
//! which case they escape each other pairwise and an odd trailing backslash
//! escapes the quote.
//!
//! Callers on platforms whose spawn primitive takes an argument vector
//! (every Unix) must not apply this escaping to that vector; see
//! [`crate::config::ProcessConfiguration`] and the host launcher.

/// Escape `raw` so that, embedded between a pair of double quotes, a
/// Windows-style argument parser reproduces `raw` exactly as one argument.
///
/// The surrounding quotes are not added.
pub fn escape_command_line_arg(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + raw.len() / 8);
    let mut run = 0usize;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                run += 1;
                // A trailing run would otherwise escape the closing quote.
                if chars.peek().is_none() {
                    push_backslashes(&mut escaped, run * 2);
                }
            }
            '"' => {
                push_backslashes(&mut escaped, run * 2);
                run = 0;
                escaped.push_str("\\\"");
            }
            other => {
                push_backslashes(&mut escaped, run);
                run = 0;
                escaped.push(other);
            }
        }
    }

    escaped
}

fn push_backslashes(out: &mut String, count: usize) {
    out.extend(std::iter::repeat_n('\\', count));
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse the body of a double-quoted argument the way the MSVC runtime
    /// does, stopping at the first unescaped quote.
    fn parse_quoted(body: &str) -> String {
        let mut out = String::new();
        let mut run = 0usize;
        for c in body.chars() {
            match c {
                '\\' => run += 1,
                '"' => {
                    out.extend(std::iter::repeat_n('\\', run / 2));
                    if run % 2 == 0 {
                        return out;
                    }
                    out.push('"');
                    run = 0;
                }
                other => {
                    out.extend(std::iter::repeat_n('\\', run));
                    run = 0;
                    out.push(other);
                }
            }
        }
        out.extend(std::iter::repeat_n('\\', run));
        out
    }

    fn round_trip(raw: &str) -> String {
        parse_quoted(&format!("{}\"", escape_command_line_arg(raw)))
    }

    #[test]
    fn empty_string_stays_empty() {
        assert_eq!(escape_command_line_arg(""), "");
    }

    #[test]
    fn plain_text_is_unchanged() {
        let raw = "const http = require('http'); http.createServer().listen(0);";
        assert_eq!(escape_command_line_arg(raw), raw);
        assert_eq!(escape_command_line_arg("a"), "a");
    }

    #[test]
    fn single_trailing_backslash_is_doubled() {
        assert_eq!(escape_command_line_arg("\\"), "\\\\");
    }

    #[test]
    fn only_backslashes_are_all_doubled() {
        assert_eq!(escape_command_line_arg("\\\\"), "\\\\\\\\");
        assert_eq!(escape_command_line_arg("\\\\\\"), "\\\\\\\\\\\\");
    }

    #[test]
    fn trailing_run_after_text_is_doubled() {
        assert_eq!(escape_command_line_arg("dir\\"), "dir\\\\");
        assert_eq!(escape_command_line_arg("C:\\path\\\\"), "C:\\path\\\\\\\\");
    }

    #[test]
    fn interior_backslashes_stay_literal() {
        assert_eq!(escape_command_line_arg("\\\\x"), "\\\\x");
        assert_eq!(escape_command_line_arg("C:\\temp\\file"), "C:\\temp\\file");
    }

    #[test]
    fn quote_is_escaped() {
        assert_eq!(escape_command_line_arg("say \"hi\""), "say \\\"hi\\\"");
    }

    #[test]
    fn escaped_quote_in_input_doubles_its_backslash() {
        assert_eq!(escape_command_line_arg("a\\\"b"), "a\\\\\\\"b");
    }

    #[test]
    fn parser_reproduces_input() {
        let cases = [
            "",
            "a",
            "\\",
            "\\\\",
            "a\\\"b",
            "\"",
            "\\\"\\",
            "path\\to\\dir\\",
            "console.log(\"done\\\\\")",
            "tab\there and unicode \u{00e9}\u{1f600}",
            "\\\\\\\"\\\\\"\\",
        ];
        for raw in cases {
            assert_eq!(round_trip(raw), raw, "round trip failed for {raw:?}");
        }
    }
}
