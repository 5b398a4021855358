//! Validation point enumeration.
//!
//! Every field a schema declares becomes one validation point. Nested
//! objects are walked recursively; arrays of objects contribute a `[*]`
//! wildcard segment. Within each object, required fields come first, then
//! optional ones, each group in declaration order.

use std::fmt;

use serde_json::{Map, Value};

use crate::types::split_tags;

/// Tag added to every schema-derived constraint.
pub const STRUCTURAL_TAG: &str = "JSON";

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    /// Every element of an array
    Wildcard,
}

/// Path from the document root to a field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath(pub Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.contains(&Segment::Wildcard)
    }

    fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Field(name) if i == 0 => f.write_str(name)?,
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Wildcard => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

/// A field the expander checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPoint {
    pub path: FieldPath,
    /// The field's own schema
    pub schema: Value,
    /// Declared capability tags plus the structural tag
    pub capabilities: Vec<String>,
    /// Required at this level and at every ancestor
    pub required: bool,
}

/// Enumerate validation points for a schema document.
///
/// A schema that declares no fields yields a single root point that checks
/// the whole document.
pub fn validation_points(schema: &Value) -> Vec<ValidationPoint> {
    let mut points = Vec::new();

    if has_type(schema, "object") {
        walk_object(schema, &FieldPath::root(), true, &mut points);
    } else if has_type(schema, "array") {
        if let Some(items) = schema.get("items").filter(|i| has_type(i, "object")) {
            walk_object(items, &FieldPath::root().child(Segment::Wildcard), true, &mut points);
        }
    }

    if points.is_empty() {
        points.push(ValidationPoint {
            path: FieldPath::root(),
            schema: schema.clone(),
            capabilities: capabilities(schema),
            required: true,
        });
    }

    points
}

fn walk_object(schema: &Value, prefix: &FieldPath, parent_required: bool, out: &mut Vec<ValidationPoint>) {
    let empty = Map::new();
    let properties = schema.get("properties").and_then(Value::as_object).unwrap_or(&empty);
    let mut required: Vec<&str> = Vec::new();
    for name in schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        if !required.contains(&name) {
            required.push(name);
        }
    }

    let ordered = required
        .iter()
        .map(|name| (*name, true))
        .chain(
            properties
                .keys()
                .map(String::as_str)
                .filter(|name| !required.contains(name))
                .map(|name| (name, false)),
        );

    let any_schema = Value::Object(Map::new());
    for (name, is_required) in ordered {
        let field_schema = properties.get(name).unwrap_or(&any_schema);
        let path = prefix.child(Segment::Field(name.to_string()));
        let required = parent_required && is_required;

        out.push(ValidationPoint {
            path: path.clone(),
            schema: field_schema.clone(),
            capabilities: capabilities(field_schema),
            required,
        });

        if has_type(field_schema, "object") {
            walk_object(field_schema, &path, required, out);
        } else if has_type(field_schema, "array") {
            if let Some(items) = field_schema.get("items").filter(|i| has_type(i, "object")) {
                walk_object(items, &path.child(Segment::Wildcard), required, out);
            }
        }
    }
}

/// Whether a schema's `type` is, or includes, the given type.
pub(crate) fn has_type(schema: &Value, expected: &str) -> bool {
    match schema.get("type") {
        Some(Value::String(t)) => t == expected,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(expected)),
        _ => false,
    }
}

fn capabilities(schema: &Value) -> Vec<String> {
    let declared: Vec<&str> = match schema.get("capability") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(tags)) => tags.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    split_tags(declared.into_iter().chain([STRUCTURAL_TAG]))
}
