//! Text normalization applied before chunking.
//!
//! The default cleaner strips URLs and email-like tokens, collapses every whitespace run to a
//! single space and trims the result. Two opt-in behaviours exist for extracted documents:
//! keeping paragraph breaks (so the chunker can split on them) and dropping page
//! header/footer lines such as `Page 3` or `© 2024 …`.

use regex::Regex;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|ftp://|www\.)[^\s<>]+").expect("valid url pattern")
});
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid email pattern")
});
static WHITESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static INLINE_WHITESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid inline whitespace pattern"));
static EXCESS_NEWLINES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline pattern"));
static HEADER_FOOTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:page\s*\d+(?:\s*of\s*\d+)?|\d+\s*of\s*\d+|©.*|all rights reserved.*)$")
        .expect("valid header pattern")
});

/// Deterministic, side-effect-free text normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCleaner {
    preserve_paragraphs: bool,
    strip_headers_footers: bool,
}

impl TextCleaner {
    /// Cleaner with the default behaviour: everything collapses onto one line.
    pub const fn new() -> Self {
        Self {
            preserve_paragraphs: false,
            strip_headers_footers: false,
        }
    }

    /// Keep line structure, collapsing three or more newlines to one blank line.
    pub const fn preserve_paragraphs(mut self, enabled: bool) -> Self {
        self.preserve_paragraphs = enabled;
        self
    }

    /// Drop page-number, copyright and "x of y" lines.
    pub const fn strip_headers_footers(mut self, enabled: bool) -> Self {
        self.strip_headers_footers = enabled;
        self
    }

    /// Normalize `raw_text`. Never fails; empty input yields an empty string.
    pub fn clean(&self, raw_text: &str) -> String {
        if raw_text.is_empty() {
            return String::new();
        }

        let mut text = raw_text.replace("\r\n", "\n").replace('\r', "\n");

        if self.strip_headers_footers {
            text = text
                .lines()
                .filter(|line| !HEADER_FOOTER_PATTERN.is_match(line.trim()))
                .collect::<Vec<_>>()
                .join("\n");
        }

        let text = URL_PATTERN.replace_all(&text, " ");
        let text = EMAIL_PATTERN.replace_all(&text, " ");

        if self.preserve_paragraphs {
            let lines: Vec<String> = text
                .split('\n')
                .map(|line| INLINE_WHITESPACE_PATTERN.replace_all(line, " ").trim().to_string())
                .collect();
            let joined = lines.join("\n");
            EXCESS_NEWLINES_PATTERN
                .replace_all(&joined, "\n\n")
                .trim()
                .to_string()
        } else {
            WHITESPACE_PATTERN.replace_all(&text, " ").trim().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_empty_string() {
        assert_eq!(TextCleaner::new().clean(""), "");
        assert_eq!(TextCleaner::new().clean(" \n\t "), "");
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        let cleaned = TextCleaner::new().clean("  Hello \t\n\n  world  ");
        assert_eq!(cleaned, "Hello world");
    }

    #[test]
    fn removes_urls_and_emails() {
        let cleaned = TextCleaner::new().clean(
            "See https://example.com/docs?x=1 or www.example.org, mail jane.doe@example.com today",
        );
        assert_eq!(cleaned, "See or mail today");
    }

    #[test]
    fn preserves_paragraphs_when_requested() {
        let cleaner = TextCleaner::new().preserve_paragraphs(true);
        let cleaned = cleaner.clean("First   line\n\n\n\nSecond\t paragraph  ");
        assert_eq!(cleaned, "First line\n\nSecond paragraph");
    }

    #[test]
    fn strips_header_and_footer_lines() {
        let cleaner = TextCleaner::new()
            .preserve_paragraphs(true)
            .strip_headers_footers(true);
        let cleaned = cleaner.clean("Page 3\nBody text here\n© 2024 Example Corp\n3 of 10");
        assert_eq!(cleaned, "Body text here");
    }

    #[test]
    fn keeps_body_lines_that_start_with_page_numbers() {
        let cleaner = TextCleaner::new()
            .preserve_paragraphs(true)
            .strip_headers_footers(true);
        let cleaned =
            cleaner.clean("Page 12 shows the results.\nPage 2 of 7\n4 of 10 samples failed");
        assert_eq!(cleaned, "Page 12 shows the results.\n4 of 10 samples failed");
    }

    #[test]
    fn cleaning_is_deterministic() {
        let cleaner = TextCleaner::new();
        let input = "a  b\nc https://x.y z";
        assert_eq!(cleaner.clean(input), cleaner.clean(input));
    }
}
