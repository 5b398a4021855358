//! Dataset loading and load-time validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::graph::{dependency_levels, GraphError};
use crate::types::Item;

/// Errors in a single item.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error("Item has an empty question")]
    EmptyQuestion,

    #[error("Invalid dependency graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Constraint {point_id} references a schema document but the item has none")]
    MissingSchema { point_id: i64 },

    #[error("Schema constraint {point_id} must not declare dependencies")]
    SchemaDependencies { point_id: i64 },

    #[error("Constraint {point_id} references unknown extraction directive '{key}'")]
    UnknownDirective { point_id: i64, key: String },

    #[error("Constraint {point_id} uses a negative point id, which is reserved for schema fields")]
    ReservedPointId { point_id: i64 },
}

/// Errors that can occur when loading a dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Item {index} ({question}): {source}")]
    InvalidItem {
        index: usize,
        question: String,
        #[source]
        source: ItemError,
    },

    #[error("Duplicate original question: {0}")]
    DuplicateIdentity(String),
}

impl Item {
    /// Check the invariants evaluation depends on.
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.question.trim().is_empty() {
            return Err(ItemError::EmptyQuestion);
        }

        for constraint in &self.constraints {
            if constraint.point_id < 0 {
                return Err(ItemError::ReservedPointId { point_id: constraint.point_id });
            }
            if constraint.is_schema_document() {
                if self.schema.is_none() {
                    return Err(ItemError::MissingSchema { point_id: constraint.point_id });
                }
                if !constraint.dependencies.is_empty() {
                    return Err(ItemError::SchemaDependencies { point_id: constraint.point_id });
                }
            }
            if let Some(key) = &constraint.extraction {
                if !self.directives.contains_key(key) {
                    return Err(ItemError::UnknownDirective {
                        point_id: constraint.point_id,
                        key: key.clone(),
                    });
                }
            }
        }

        dependency_levels(&self.constraints)?;
        Ok(())
    }
}

/// A validated list of items.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub items: Vec<Item>,
}

impl Dataset {
    /// Build a dataset from items, filling identities and validating.
    pub fn new(mut items: Vec<Item>) -> Result<Self, DatasetError> {
        items.iter_mut().for_each(Item::ensure_identity);
        validate_items(&items)?;
        Ok(Self { items })
    }

    /// Parse a dataset from a JSON array (or a single JSON object).
    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let items = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };
        Self::new(items)
    }

    /// Parse a dataset from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, DatasetError> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let items = if value.is_sequence() {
            serde_yaml::from_value(value)?
        } else {
            vec![serde_yaml::from_value(value)?]
        };
        Self::new(items)
    }

    /// Load a dataset file; `.yaml`/`.yml` files are read as YAML, anything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }
}

/// Validate every item and the uniqueness of identity keys.
pub fn validate_items(items: &[Item]) -> Result<(), DatasetError> {
    let mut seen = HashSet::new();
    for (index, item) in items.iter().enumerate() {
        item.validate().map_err(|source| DatasetError::InvalidItem {
            index,
            question: item.original_question.clone(),
            source,
        })?;
        if !seen.insert(item.original_question.as_str()) {
            return Err(DatasetError::DuplicateIdentity(item.original_question.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"[
        {
            "question": "List three fruits",
            "constraints": [
                {"point_id": 1, "question": "Are three items listed?", "rule": "item_count:[3,3]", "extraction": "fruits"},
                {"point_id": 2, "question": "Are they all fruits?", "dependencies": [1], "extraction": "fruits"}
            ],
            "directives": {"fruits": "Extract each fruit"}
        }
    ]"#;

    #[test]
    fn test_parse_valid_dataset() {
        let dataset = Dataset::from_json(SIMPLE).unwrap();
        assert_eq!(dataset.len(), 1);

        let item = &dataset.items[0];
        assert_eq!(item.original_question, "List three fruits");
        assert_eq!(item.constraints[1].dependencies, vec![1]);
    }

    #[test]
    fn test_single_object_accepted() {
        let json = r#"{"question": "q", "constraints": []}"#;
        assert_eq!(Dataset::from_json(json).unwrap().len(), 1);
    }

    #[test]
    fn test_yaml_dataset() {
        let yaml = r#"
- question: "Say hi"
  constraints:
    - point_id: 1
      question: "Does it greet?"
      rule: 'keyword:["hi"]'
"#;
        let dataset = Dataset::from_yaml(yaml).unwrap();
        assert!(dataset.items[0].constraints[0].rule.is_some());
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        let json = r#"[{"question": "q", "constraints": [
            {"point_id": 1, "question": "a", "dependencies": [2]},
            {"point_id": 2, "question": "b", "dependencies": [1]}
        ]}]"#;
        let err = Dataset::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::InvalidItem { source: ItemError::Graph(GraphError::Cycle { .. }), .. }
        ));
    }

    #[test]
    fn test_schema_constraint_rules() {
        let missing = r#"[{"question": "q", "constraints": [
            {"point_id": 1, "question": "valid json?", "rule": "SCHEMA:json_schema"}
        ]}]"#;
        assert!(matches!(
            Dataset::from_json(missing).unwrap_err(),
            DatasetError::InvalidItem { source: ItemError::MissingSchema { point_id: 1 }, .. }
        ));

        let with_deps = r#"[{"question": "q", "json_schema": {"type": "object"}, "constraints": [
            {"point_id": 1, "question": "a"},
            {"point_id": 2, "question": "valid json?", "rule": "SCHEMA:json_schema", "dependencies": [1]}
        ]}]"#;
        assert!(matches!(
            Dataset::from_json(with_deps).unwrap_err(),
            DatasetError::InvalidItem { source: ItemError::SchemaDependencies { point_id: 2 }, .. }
        ));
    }

    #[test]
    fn test_unknown_directive_rejected() {
        let json = r#"[{"question": "q", "constraints": [
            {"point_id": 1, "question": "a", "extraction": "nope"}
        ]}]"#;
        assert!(matches!(
            Dataset::from_json(json).unwrap_err(),
            DatasetError::InvalidItem { source: ItemError::UnknownDirective { .. }, .. }
        ));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let json = r#"[
            {"question": "same", "constraints": []},
            {"question": "same", "constraints": []}
        ]"#;
        assert!(matches!(
            Dataset::from_json(json).unwrap_err(),
            DatasetError::DuplicateIdentity(_)
        ));
    }

    #[test]
    fn test_malformed_rule_rejected_at_load() {
        let json = r#"[{"question": "q", "constraints": [
            {"point_id": 1, "question": "a", "rule": "item_count:[9,1]"}
        ]}]"#;
        assert!(matches!(Dataset::from_json(json).unwrap_err(), DatasetError::JsonError(_)));
    }
}
