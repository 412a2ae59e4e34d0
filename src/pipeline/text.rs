//! Turning entry markup into plain text.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("valid script regex")
});
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|blockquote)\s*>").expect("valid line break regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\x0B\x0C]+").expect("valid space regex"));
static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));

/// Convert an HTML fragment to plain text.
///
/// Entities are decoded exactly once, after tags are removed, so `&amp;lt;`
/// becomes the literal `&lt;`.
#[must_use]
pub fn clean_entry_text(fragment: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(fragment, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);
    normalize_whitespace(&text)
}

/// Normalize line endings and spacing of already-decoded text.
///
/// Runs of spaces collapse to one, lines are trimmed, and three or more
/// consecutive newlines collapse to two.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    let text = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ");
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| HORIZONTAL_SPACE.replace_all(line, " ").trim().to_string())
        .collect();
    EXCESS_NEWLINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

/// Decode entities in a short attribute or label value and trim it.
#[must_use]
pub fn decode_label(raw: &str) -> String {
    normalize_whitespace(&html_escape::decode_html_entities(raw))
}

/// Largest char boundary of `s` that is not after `index`.
pub(crate) fn floor_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Smallest char boundary of `s` that is not before `index`.
pub(crate) fn ceil_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (index..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(s.len())
}
