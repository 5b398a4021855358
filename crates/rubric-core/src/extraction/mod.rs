//! Extraction directives and the fragments they resolve to.
//!
//! A directive tells the extraction pass how to isolate the part of a
//! response a constraint judges. Directives are stored as strings on the
//! wire; a marker prefix selects the strategy:
//!
//! | Wire form            | Strategy                                   |
//! |----------------------|--------------------------------------------|
//! | `#CODE#<text>`       | extractor writes an [`ExtractionProgram`]  |
//! | `#JSONSCHEMA#<path>` | dotted path into the structured response   |
//! | `#LISTSCHEMA#<text>` | parse the response as a list               |
//! | anything else        | extractor returns the fragments directly   |

pub mod program;
pub mod structural;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::parse_structured;

pub use program::{ExtractionProgram, Step};
pub use structural::{extract_list, extract_path};

const CODE_MARKER: &str = "#CODE#";
const PATH_MARKER: &str = "#JSONSCHEMA#";
const LIST_MARKER: &str = "#LISTSCHEMA#";

/// Sentinel reply meaning "the fragment is the whole response".
pub const WHOLE_RESPONSE: &str = "ALL";

/// Errors from resolving a fragment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Unparseable structured text: {0}")]
    Unparseable(String),

    #[error("Expected a list, got {0}")]
    NotAList(String),

    #[error("Path '{0}' not found in response")]
    PathNotFound(String),

    #[error("Invalid extraction program: {0}")]
    InvalidProgram(String),
}

/// How to obtain a constraint's fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExtractionDirective {
    /// Extractor returns the fragment list itself
    ModelGuided(String),
    /// Extractor returns a program that is run on the response
    Programmatic(String),
    /// Dotted path into the parsed response
    StructuralPath(String),
    /// Response parsed as a list
    StructuralList(String),
}

impl ExtractionDirective {
    /// Whether resolving this directive calls the extractor.
    pub fn requires_model(&self) -> bool {
        matches!(self, Self::ModelGuided(_) | Self::Programmatic(_))
    }

    /// The directive text without its marker.
    pub fn text(&self) -> &str {
        match self {
            Self::ModelGuided(s) | Self::Programmatic(s) | Self::StructuralPath(s) | Self::StructuralList(s) => s,
        }
    }
}

impl FromStr for ExtractionDirective {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let directive = if let Some(rest) = s.strip_prefix(CODE_MARKER) {
            Self::Programmatic(rest.trim().to_string())
        } else if let Some(rest) = s.strip_prefix(PATH_MARKER) {
            Self::StructuralPath(rest.trim().to_string())
        } else if let Some(rest) = s.strip_prefix(LIST_MARKER) {
            Self::StructuralList(rest.trim().to_string())
        } else {
            Self::ModelGuided(s.to_string())
        };
        Ok(directive)
    }
}

impl From<String> for ExtractionDirective {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(d) => d,
            Err(never) => match never {},
        }
    }
}

impl From<ExtractionDirective> for String {
    fn from(d: ExtractionDirective) -> Self {
        d.to_string()
    }
}

impl fmt::Display for ExtractionDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelGuided(s) => f.write_str(s),
            Self::Programmatic(s) => write!(f, "{CODE_MARKER}{s}"),
            Self::StructuralPath(s) => write!(f, "{PATH_MARKER}{s}"),
            Self::StructuralList(s) => write!(f, "{LIST_MARKER}{s}"),
        }
    }
}

/// The resolved part of a response that a constraint judges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fragment {
    Parts(Vec<String>),
    /// Extraction failed; dependent constraints fail with this reason
    Invalid(String),
}

impl Fragment {
    pub fn whole(response: &str) -> Self {
        Self::Parts(vec![response.to_string()])
    }

    pub fn parts(&self) -> Option<&[String]> {
        match self {
            Self::Parts(p) => Some(p),
            Self::Invalid(_) => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

impl From<Result<Vec<String>, ExtractionError>> for Fragment {
    fn from(result: Result<Vec<String>, ExtractionError>) -> Self {
        match result {
            Ok(parts) => Self::Parts(parts),
            Err(e) => Self::Invalid(e.to_string()),
        }
    }
}

/// Interpret a model-guided extractor reply.
///
/// `ALL` selects the whole response; anything else must be a list of strings.
pub fn parse_extraction_reply(reply: &str, response: &str) -> Fragment {
    let trimmed = reply.trim().trim_matches('`').trim();
    if trimmed == WHOLE_RESPONSE || trimmed.trim_matches(['"', '\'']) == WHOLE_RESPONSE {
        return Fragment::whole(response);
    }

    match parse_list(reply) {
        Ok(parts) => Fragment::Parts(parts),
        Err(e) => Fragment::Invalid(format!("Extractor reply was not a list: {e}")),
    }
}

/// Render a JSON value as fragment text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse text as a list of strings.
///
/// Accepts a JSON array (optionally fenced or embedded in prose), a list of
/// single- or double-quoted strings, or a bulleted/numbered markdown list.
pub fn parse_list(text: &str) -> Result<Vec<String>, ExtractionError> {
    match parse_structured(text) {
        Ok(Value::Array(values)) => return Ok(values.iter().map(value_text).collect()),
        Ok(other) => return Err(ExtractionError::NotAList(json_type(&other).to_string())),
        Err(_) => {}
    }

    if let Some(list) = parse_quoted_list(text) {
        return Ok(list);
    }

    let bullets: Vec<String> = text
        .lines()
        .filter(|line| crate::rules::patterns::LIST_MARKER.is_match(line))
        .map(|line| crate::rules::patterns::strip_list_marker(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if !bullets.is_empty() {
        return Ok(bullets);
    }

    Err(ExtractionError::Unparseable(truncate(text, 80)))
}

/// Parse `['a', "b"]` style lists that are not valid JSON.
fn parse_quoted_list(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }

    let mut chars = text[start + 1..end].chars().peekable();
    let mut items = Vec::new();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let quote = match chars.next() {
            None => break,
            Some(q @ ('"' | '\'')) => q,
            Some(_) => return None,
        };

        let mut item = String::new();
        loop {
            match chars.next()? {
                '\\' => match chars.next()? {
                    'n' => item.push('\n'),
                    't' => item.push('\t'),
                    other => item.push(other),
                },
                c if c == quote => break,
                c => item.push(c),
            }
        }
        items.push(item);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return None,
        }
    }
    Some(items)
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &trimmed[..i]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_markers() {
        assert_eq!(
            "#CODE#Extract each line".parse::<ExtractionDirective>().unwrap(),
            ExtractionDirective::Programmatic("Extract each line".into())
        );
        assert_eq!(
            "#JSONSCHEMA#user.name".parse::<ExtractionDirective>().unwrap(),
            ExtractionDirective::StructuralPath("user.name".into())
        );
        assert_eq!(
            "#LISTSCHEMA#titles".parse::<ExtractionDirective>().unwrap(),
            ExtractionDirective::StructuralList("titles".into())
        );
        let guided: ExtractionDirective = "Extract the poem title".parse().unwrap();
        assert!(guided.requires_model());
        assert_eq!(guided.to_string(), "Extract the poem title");
    }

    #[test]
    fn test_directive_serde_round_trip() {
        let d: ExtractionDirective = serde_json::from_str("\"#JSONSCHEMA#a.b\"").unwrap();
        assert!(!d.requires_model());
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"#JSONSCHEMA#a.b\"");
    }

    #[test]
    fn test_all_sentinel_selects_whole_response() {
        assert_eq!(parse_extraction_reply("ALL", "full text"), Fragment::whole("full text"));
        assert_eq!(parse_extraction_reply(" \"ALL\"\n", "full text"), Fragment::whole("full text"));
    }

    #[test]
    fn test_reply_list_forms() {
        assert_eq!(
            parse_extraction_reply("```json\n[\"a\", \"b\"]\n```", ""),
            Fragment::Parts(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            parse_extraction_reply("['one', 'two, three']", ""),
            Fragment::Parts(vec!["one".into(), "two, three".into()])
        );
        assert!(parse_extraction_reply("I could not find it", "").is_invalid());
    }

    #[test]
    fn test_parse_list_markdown_fallback() {
        let list = parse_list("Items:\n1. apples\n2. pears\n").unwrap();
        assert_eq!(list, vec!["apples", "pears"]);
    }

    #[test]
    fn test_parse_list_rejects_object() {
        assert_eq!(parse_list("{\"a\": 1}"), Err(ExtractionError::NotAList("object".into())));
    }
}
