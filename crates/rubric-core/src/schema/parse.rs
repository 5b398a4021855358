//! Lenient parsing of structured responses.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::SchemaError;

lazy_static! {
    /// Fenced code block, optionally tagged json
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").unwrap();
}

/// Parse a response as JSON.
///
/// Tries, in order: the text as-is, the first fenced code block, and the
/// span from the first `{` or `[` to the last matching closer.
pub fn parse_structured(text: &str) -> Result<Value, SchemaError> {
    let trimmed = text.trim();
    let first_error = match serde_json::from_str(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(block) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str().trim()) {
            return Ok(value);
        }
    }

    if let Some(span) = bracketed_span(trimmed) {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }

    Err(SchemaError::Unparseable(first_error.to_string()))
}

fn bracketed_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}
