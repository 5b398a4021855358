//! Shared text patterns for rule functions.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// One word: a single CJK character, or a run of other letters/digits
    pub static ref WORD_PATTERN: Regex = Regex::new(
        r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]|[^\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}\s\p{P}\p{S}]+"
    ).unwrap();

    /// Trailing ASCII or full-width punctuation
    pub static ref TRAILING_PUNCTUATION: Regex = Regex::new(
        r"[.,!?:;。，！？：；]\s*$"
    ).unwrap();

    /// Leading list numbering such as `1.`, `2)`, `-` or `*`
    pub static ref LIST_MARKER: Regex = Regex::new(
        r"^\s*(?:\d+[.)、]|[-*•])\s*"
    ).unwrap();
}

/// Count words, treating each CJK character as one word.
pub fn word_count(text: &str) -> usize {
    WORD_PATTERN.find_iter(text).count()
}

/// Check if text ends with punctuation.
pub fn ends_with_punctuation(text: &str) -> bool {
    TRAILING_PUNCTUATION.is_match(text)
}

/// Remove a leading list marker, if any.
pub fn strip_list_marker(text: &str) -> &str {
    match LIST_MARKER.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}
