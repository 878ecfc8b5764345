//! Cleanup pipeline for extracted plain text.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on extracted text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = normalize_line_endings(text);

    result = strip_control_chars(&result);
    result = collapse_inline_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Control characters
// ---------------------------------------------------------------------------

/// Drop control characters (form feeds, NULs from PDF strings) except newlines and tabs.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 3: Inline whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of spaces and tabs, trim every line.
fn collapse_inline_whitespace(text: &str) -> String {
    static SPACE_RUN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));

    text.lines()
        .map(|line| SPACE_RUN_RE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into one.
fn clean_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE
        .replace_all(text.trim_start_matches('\n'), "\n\n")
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline (empty text stays empty).
fn ensure_trailing_newline(text: &str) -> String {
    let trimmed = text.trim_end_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_chars_but_keeps_newlines() {
        let result = strip_control_chars("a\u{0c}b\u{0}c\nd\te");
        assert_eq!(result, "abc\nd\te");
    }

    #[test]
    fn collapses_inline_whitespace() {
        let result = collapse_inline_whitespace("  Section 1.   The   act\t\tis\u{a0}amended.  ");
        assert_eq!(result, "Section 1. The act is amended.");
    }

    #[test]
    fn clean_blank_lines_collapses_excess() {
        assert_eq!(clean_blank_lines("\n\nLine 1\n\n\n\n\nLine 2"), "Line 1\n\nLine 2");
        assert_eq!(clean_blank_lines("Line 1\n\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn trailing_newline() {
        assert_eq!(ensure_trailing_newline("Content\n\n\n"), "Content\n");
        assert_eq!(ensure_trailing_newline("Content"), "Content\n");
        assert_eq!(ensure_trailing_newline("\n\n"), "");
    }

    #[test]
    fn full_pipeline() {
        let input = "AN ACT relating to taxes.\r\n\r\n\r\n\r\n  Section 1.  W.S. 39-11-101\u{0c} is amended.   \r\n";
        let result = run_pipeline(input);
        assert_eq!(
            result,
            "AN ACT relating to taxes.\n\nSection 1. W.S. 39-11-101 is amended.\n"
        );
    }
}
