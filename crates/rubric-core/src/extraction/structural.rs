//! Structural extraction: read fragments straight out of a structured response.

use serde_json::Value;

use super::{parse_list, value_text, ExtractionError};
use crate::schema::parse_structured;

/// Follow a dotted path (`user.tags.0`) into the parsed response.
///
/// An array at the end of the path yields one fragment per element; any
/// other value yields a single fragment.
pub fn extract_path(response: &str, path: &str) -> Result<Vec<String>, ExtractionError> {
    let root = parse_structured(response).map_err(|e| ExtractionError::Unparseable(e.to_string()))?;

    let mut current = &root;
    for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| ExtractionError::PathNotFound(path.to_string()))?;
    }

    Ok(match current {
        Value::Array(items) => items.iter().map(value_text).collect(),
        other => vec![value_text(other)],
    })
}

/// Parse the whole response as a list.
pub fn extract_list(response: &str) -> Result<Vec<String>, ExtractionError> {
    parse_list(response)
}
