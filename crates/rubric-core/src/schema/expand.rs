//! Expansion of a schema document into resolved synthetic constraints.

use serde_json::Value;

use super::parse::parse_structured;
use super::points::{has_type, validation_points, Segment, ValidationPoint};
use crate::extraction::json_type;
use crate::types::{Constraint, EvalMethod, Verdict};

/// Where a path landed in one document.
struct Occurrence<'a> {
    location: String,
    value: Option<&'a Value>,
}

enum Resolution {
    Pass(String),
    Fail(String),
}

/// Expand a schema into one resolved constraint per validation point.
///
/// Synthetic constraints get point ids `-1, -2, ...` in enumeration order,
/// no dependencies, and the [`EvalMethod::Schema`] method. Every constraint
/// fails with a parse explanation when the response is not structured text.
pub fn expand(schema: &Value, response: &str) -> Vec<Constraint> {
    let points = validation_points(schema);

    let data = match parse_structured(response) {
        Ok(data) => data,
        Err(e) => {
            return points
                .iter()
                .enumerate()
                .map(|(i, point)| {
                    synthetic(
                        i,
                        question(point, None),
                        point,
                        Resolution::Fail(format!("{}: JSON parsing failed: {e}", point.path)),
                    )
                })
                .collect();
        }
    };

    let documents: Vec<Value> = if has_type(schema, "array") {
        match data {
            Value::Array(_) => vec![data],
            other => vec![Value::Array(vec![other])],
        }
    } else {
        match data {
            Value::Array(elements) if !elements.is_empty() => elements,
            other => vec![other],
        }
    };

    let validators: Vec<Result<jsonschema::Validator, String>> = points
        .iter()
        .map(|p| jsonschema::options().build(&p.schema).map_err(|e| e.to_string()))
        .collect();

    let numbered = documents.len() > 1;
    let mut constraints = Vec::with_capacity(points.len() * documents.len());
    for (doc_index, document) in documents.iter().enumerate() {
        for (point, validator) in points.iter().zip(&validators) {
            let resolution = match validator {
                Ok(validator) => resolve(document, point, validator),
                Err(e) => Resolution::Fail(format!("{}: invalid field schema: {e}", point.path)),
            };
            let q = question(point, numbered.then_some(doc_index));
            constraints.push(synthetic(constraints.len(), q, point, resolution));
        }
    }

    constraints
}

fn synthetic(index: usize, question: String, point: &ValidationPoint, resolution: Resolution) -> Constraint {
    let mut constraint = Constraint::new(-(index as i64) - 1, question);
    constraint.capabilities = point.capabilities.clone();
    let (verdict, explanation) = match resolution {
        Resolution::Pass(e) => (Verdict::Pass, e),
        Resolution::Fail(e) => (Verdict::Fail, e),
    };
    constraint.resolve(verdict, explanation, EvalMethod::Schema);
    constraint
}

fn question(point: &ValidationPoint, document: Option<usize>) -> String {
    let base = if point.path.is_root() {
        "Does the response match the required structure?".to_string()
    } else if point.required {
        format!("Is the required field {} present and valid?", point.path)
    } else {
        format!("If present, is the field {} valid?", point.path)
    };
    match document {
        Some(i) => format!("Element {}: {base}", i + 1),
        None => base,
    }
}

fn resolve(document: &Value, point: &ValidationPoint, validator: &jsonschema::Validator) -> Resolution {
    let path = &point.path;

    if path.is_root() {
        return match violations(validator, document) {
            None => Resolution::Pass(format!("{path}: document conforms")),
            Some(reason) => Resolution::Fail(format!("{path}: {reason}")),
        };
    }

    let mut occurrences = Vec::new();
    let mut shape_errors = Vec::new();
    collect(document, path.segments(), String::new(), &mut occurrences, &mut shape_errors);

    if !shape_errors.is_empty() {
        return Resolution::Fail(format!("{path}: {}", shape_errors.join("; ")));
    }

    if !path.has_wildcard() {
        return match occurrences.first().and_then(|o| o.value) {
            None if point.required => Resolution::Fail(format!("{path}: required field missing")),
            None => Resolution::Pass(format!("{path}: optional field absent")),
            Some(value) => match violations(validator, value) {
                None => Resolution::Pass(format!("{path}: value conforms")),
                Some(reason) => Resolution::Fail(format!("{path}: {reason}")),
            },
        };
    }

    let present = occurrences.iter().filter(|o| o.value.is_some()).count();
    if present == 0 {
        return if point.required {
            Resolution::Fail(format!("{path}: required field not found in any element"))
        } else {
            Resolution::Pass(format!("{path}: optional field not used"))
        };
    }

    let offending: Vec<String> = occurrences
        .iter()
        .filter_map(|o| match o.value {
            None if point.required => Some(format!("{} (missing)", o.location)),
            None => None,
            Some(value) => violations(validator, value).map(|reason| format!("{} ({reason})", o.location)),
        })
        .collect();

    if offending.is_empty() {
        Resolution::Pass(format!("{path}: all {present} values conform"))
    } else {
        Resolution::Fail(format!(
            "{path}: {} of {} elements nonconforming: {}",
            offending.len(),
            occurrences.len(),
            offending.join("; ")
        ))
    }
}

fn collect<'a>(
    value: &'a Value,
    segments: &[Segment],
    location: String,
    out: &mut Vec<Occurrence<'a>>,
    shape_errors: &mut Vec<String>,
) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(Occurrence { location, value: Some(value) });
        return;
    };

    match head {
        Segment::Field(name) => {
            let location = if location.is_empty() { name.clone() } else { format!("{location}.{name}") };
            match value.as_object().and_then(|map| map.get(name)) {
                Some(child) => collect(child, rest, location, out, shape_errors),
                None => out.push(Occurrence { location, value: None }),
            }
        }
        Segment::Wildcard => match value {
            Value::Array(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    collect(element, rest, format!("{location}[{i}]"), out, shape_errors);
                }
            }
            Value::Null => {}
            other => {
                let at = if location.is_empty() { "$".to_string() } else { location };
                shape_errors.push(format!("expected array at {at}, got {}", json_type(other)));
            }
        },
    }
}

fn violations(validator: &jsonschema::Validator, value: &Value) -> Option<String> {
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    (!errors.is_empty()).then(|| errors.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name", "age"]
        })
    }

    #[test]
    fn test_expands_one_constraint_per_field() {
        let constraints = expand(&person_schema(), r#"{"name": "A", "age": "x"}"#);
        assert_eq!(constraints.len(), 2);

        assert_eq!(constraints[0].point_id, -1);
        assert_eq!(constraints[0].result, Verdict::Pass);
        assert_eq!(constraints[1].point_id, -2);
        assert_eq!(constraints[1].result, Verdict::Fail);
        assert!(constraints[1].explanation.starts_with("age:"));

        for c in &constraints {
            assert!(c.dependencies.is_empty());
            assert_eq!(c.method, EvalMethod::Schema);
            assert!(c.capabilities.contains(&"JSON".to_string()));
        }
    }

    #[test]
    fn test_parse_failure_fails_every_point() {
        let constraints = expand(&person_schema(), "not json");
        assert_eq!(constraints.len(), 2);
        for c in &constraints {
            assert_eq!(c.result, Verdict::Fail);
            assert!(c.explanation.contains("parsing failed"));
        }
    }

    #[test]
    fn test_optional_absent_passes_required_absent_fails() {
        let schema = json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}, "note": {"type": "string"}},
            "required": ["id"]
        });
        let constraints = expand(&schema, "{}");
        assert_eq!(constraints[0].result, Verdict::Fail);
        assert!(constraints[0].explanation.contains("required field missing"));
        assert_eq!(constraints[1].result, Verdict::Pass);
    }

    #[test]
    fn test_wildcard_reports_offending_indices() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"qty": {"type": "integer"}},
                        "required": ["qty"]
                    }
                }
            },
            "required": ["items"]
        });
        let response = r#"{"items": [{"qty": 1}, {"qty": "two"}, {}]}"#;
        let constraints = expand(&schema, response);
        let qty = constraints.iter().find(|c| c.explanation.starts_with("items[*].qty")).unwrap();

        assert_eq!(qty.result, Verdict::Fail);
        assert!(qty.explanation.contains("items[1].qty"));
        assert!(qty.explanation.contains("items[2].qty (missing)"));
        assert!(!qty.explanation.contains("items[0]"));
    }

    #[test]
    fn test_wildcard_over_non_array_fails() {
        let schema = json!({
            "type": "object",
            "properties": {
                "rows": {"type": "array", "items": {"type": "object", "properties": {"a": {}}}}
            }
        });
        let constraints = expand(&schema, r#"{"rows": 5}"#);
        let a = constraints.iter().find(|c| c.explanation.starts_with("rows[*].a")).unwrap();
        assert_eq!(a.result, Verdict::Fail);
        assert!(a.explanation.contains("expected array"));
    }

    #[test]
    fn test_array_root_wraps_single_object() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "properties": {"t": {"type": "string"}}, "required": ["t"]}
        });
        let constraints = expand(&schema, r#"{"t": "x"}"#);
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].result, Verdict::Pass);
    }

    #[test]
    fn test_object_root_with_array_data_checks_each_element() {
        let constraints = expand(&person_schema(), r#"[{"name": "a", "age": 1}, {"name": "b"}]"#);
        assert_eq!(constraints.len(), 4);
        assert!(constraints[0].question.starts_with("Element 1:"));
        assert_eq!(constraints[3].result, Verdict::Fail);
        assert_eq!(
            constraints.iter().map(|c| c.point_id).collect::<Vec<_>>(),
            vec![-1, -2, -3, -4]
        );
    }

    #[test]
    fn test_fenced_response_accepted() {
        let constraints = expand(&person_schema(), "```json\n{\"name\": \"A\", \"age\": 3}\n```");
        assert!(constraints.iter().all(|c| c.result == Verdict::Pass));
    }
}
