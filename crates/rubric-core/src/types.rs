//! Items, constraints and evaluation results.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::extraction::{ExtractionDirective, Fragment};
use crate::rules::{RuleKind, SchemaTarget};

/// Result state of a single constraint.
///
/// Serialized as `unset`/`pass`/`fail`. Legacy exports storing `1`/`0` (or
/// `true`/`false`) are accepted on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Not evaluated yet
    #[default]
    Unset,
    Pass,
    Fail,
}

impl Verdict {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Score(i64),
            Name(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Self::Unset),
            Some(Raw::Flag(passed)) => Ok(Self::from_passed(passed)),
            Some(Raw::Score(1)) => Ok(Self::Pass),
            Some(Raw::Score(0)) => Ok(Self::Fail),
            Some(Raw::Score(other)) => Err(D::Error::custom(format!(
                "invalid verdict {other}, expected 0 or 1"
            ))),
            Some(Raw::Name(name)) => match name.as_str() {
                "unset" => Ok(Self::Unset),
                "pass" => Ok(Self::Pass),
                "fail" => Ok(Self::Fail),
                other => Err(D::Error::unknown_variant(other, &["unset", "pass", "fail"])),
            },
        }
    }
}

/// How a constraint's verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvalMethod {
    #[default]
    Unevaluated,
    /// Deterministic rule function
    Rule,
    /// Judge model verdict
    Model,
    /// Schema field check (synthetic constraints and their placeholder)
    Schema,
    /// Failed because a dependency failed
    Dependency,
    /// Failed because the judged fragment could not be extracted
    Extraction,
}

/// One testable requirement against an item's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Unique within the item; synthetic schema constraints are negative
    pub point_id: i64,

    /// The requirement, phrased as a question
    pub question: String,

    /// Rule specifier; absent means semantic judgment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleKind>,

    /// Point ids that must resolve before this constraint
    #[serde(default, alias = "dep")]
    pub dependencies: Vec<i64>,

    /// Capability tags used for score rollups
    #[serde(default, alias = "capability", deserialize_with = "deserialize_tags")]
    pub capabilities: Vec<String>,

    /// Key of the item directive that yields the judged fragment
    #[serde(default, alias = "corresponding_part", skip_serializing_if = "Option::is_none")]
    pub extraction: Option<String>,

    #[serde(default, alias = "eval_result")]
    pub result: Verdict,

    #[serde(default, alias = "eval_explanation")]
    pub explanation: String,

    #[serde(default, alias = "eval_method")]
    pub method: EvalMethod,
}

impl Constraint {
    /// Create an unevaluated semantic constraint.
    pub fn new(point_id: i64, question: impl Into<String>) -> Self {
        Self {
            point_id,
            question: question.into(),
            rule: None,
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            extraction: None,
            result: Verdict::Unset,
            explanation: String::new(),
            method: EvalMethod::Unevaluated,
        }
    }

    pub fn with_rule(mut self, rule: RuleKind) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = i64>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    pub fn with_extraction(mut self, key: impl Into<String>) -> Self {
        self.extraction = Some(key.into());
        self
    }

    /// Record a verdict.
    pub fn resolve(&mut self, verdict: Verdict, explanation: impl Into<String>, method: EvalMethod) {
        self.result = verdict;
        self.explanation = explanation.into();
        self.method = method;
    }

    /// Clear the verdict so the constraint can be evaluated again.
    pub fn reset(&mut self) {
        self.result = Verdict::Unset;
        self.explanation.clear();
        self.method = EvalMethod::Unevaluated;
    }

    pub fn is_resolved(&self) -> bool {
        self.result != Verdict::Unset
    }

    pub fn failed(&self) -> bool {
        self.result == Verdict::Fail
    }

    /// Whether this constraint is a placeholder for a schema document.
    pub fn is_schema_document(&self) -> bool {
        matches!(self.rule, Some(RuleKind::Schema(SchemaTarget::Document)))
    }
}

/// One evaluation unit: a prompt, its response and its constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// The prompt sent to the subject system; rewritten by correction rounds
    pub question: String,

    /// Identity key across rounds; defaults to `question` on load
    #[serde(default, alias = "og_question")]
    pub original_question: String,

    /// Free-form category; `single` selects single-target extraction prompts
    #[serde(default)]
    pub category: String,

    /// The subject system's response
    #[serde(default, alias = "model_response", skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    /// Ordered constraint list
    #[serde(alias = "sub_questions")]
    pub constraints: Vec<Constraint>,

    /// Named extraction directives referenced by constraints
    #[serde(default, alias = "corresponding_parts", skip_serializing_if = "BTreeMap::is_empty")]
    pub directives: BTreeMap<String, ExtractionDirective>,

    /// Schema document referenced by `SCHEMA:json_schema` constraints
    #[serde(default, alias = "json_schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,

    /// Fragments resolved by the extraction pass, keyed like `directives`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fragments: BTreeMap<String, Fragment>,
}

impl Item {
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            original_question: question.clone(),
            question,
            category: String::new(),
            response: None,
            constraints: Vec::new(),
            directives: BTreeMap::new(),
            schema: None,
            fragments: BTreeMap::new(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_directive(mut self, key: impl Into<String>, directive: ExtractionDirective) -> Self {
        self.directives.insert(key.into(), directive);
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// The response, or an empty string when none was generated.
    pub fn response_text(&self) -> &str {
        self.response.as_deref().unwrap_or_default()
    }

    /// Find a constraint by point id.
    pub fn constraint(&self, point_id: i64) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.point_id == point_id)
    }

    /// Whether any constraint failed.
    pub fn has_failures(&self) -> bool {
        self.constraints.iter().any(Constraint::failed)
    }

    pub fn failing(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.failed())
    }

    /// Whether the category asks for single-target extraction.
    pub fn is_single_target(&self) -> bool {
        self.category.contains("single")
    }

    /// Fill in the identity key when the input omitted it.
    pub fn ensure_identity(&mut self) {
        if self.original_question.is_empty() {
            self.original_question = self.question.clone();
        }
    }

    /// A copy with results, fragments and response cleared.
    pub fn blueprint(&self) -> Self {
        let mut copy = self.clone();
        copy.response = None;
        copy.fragments.clear();
        for constraint in &mut copy.constraints {
            constraint.reset();
        }
        copy
    }
}

/// Accepts a tag list or a single string carrying `,`/`、` separated tags.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        One(String),
        Many(Vec<String>),
    }

    let raw = match Option::<Tags>::deserialize(deserializer)? {
        None => return Ok(Vec::new()),
        Some(Tags::One(s)) => vec![s],
        Some(Tags::Many(v)) => v,
    };

    Ok(split_tags(raw.iter().map(String::as_str)))
}

/// Split, trim and de-duplicate capability tags, keeping first-seen order.
pub fn split_tags<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for chunk in raw {
        for tag in chunk.split([',', '、']) {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_legacy_field_names() {
        let json = r#"{
            "question": "Write a haiku",
            "model_response": "Old pond",
            "sub_questions": [
                {"point_id": 1, "question": "Is it a haiku?", "dep": [], "capability": "Theme requirement、Generate in certain style"},
                {"point_id": 2, "question": "Mentions a frog?", "rule": "keyword:[\"frog\"]", "dep": [1], "corresponding_part": "poem"}
            ],
            "corresponding_parts": {"poem": "Extract the poem"}
        }"#;

        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(item.response_text(), "Old pond");
        assert_eq!(item.constraints.len(), 2);
        assert_eq!(
            item.constraints[0].capabilities,
            vec!["Theme requirement", "Generate in certain style"]
        );
        assert_eq!(item.constraints[1].dependencies, vec![1]);
        assert_eq!(item.constraints[1].extraction.as_deref(), Some("poem"));
        assert!(item.constraints[1].rule.is_some());
        assert_eq!(item.constraints[0].result, Verdict::Unset);
    }

    #[test]
    fn test_split_tags_dedupes() {
        let tags = split_tags(["JSON, Markdown", "JSON"]);
        assert_eq!(tags, vec!["JSON", "Markdown"]);
    }

    #[test]
    fn test_blueprint_clears_results() {
        let mut item = Item::new("q").with_response("r").with_constraint(Constraint::new(1, "c"));
        item.constraints[0].resolve(Verdict::Fail, "nope", EvalMethod::Model);
        assert!(item.has_failures());

        let blueprint = item.blueprint();
        assert!(blueprint.response.is_none());
        assert!(!blueprint.has_failures());
        assert_eq!(blueprint.constraints[0].method, EvalMethod::Unevaluated);
    }

    #[test]
    fn test_legacy_numeric_results_load() {
        let json = r#"[
            {"point_id": 1, "question": "a", "eval_result": 1},
            {"point_id": 2, "question": "b", "eval_result": 0},
            {"point_id": 3, "question": "c", "eval_result": null},
            {"point_id": 4, "question": "d", "result": true}
        ]"#;
        let constraints: Vec<Constraint> = serde_json::from_str(json).unwrap();
        let results: Vec<Verdict> = constraints.iter().map(|c| c.result).collect();
        assert_eq!(results, vec![Verdict::Pass, Verdict::Fail, Verdict::Unset, Verdict::Pass]);

        assert!(serde_json::from_str::<Verdict>("2").is_err());
        assert!(serde_json::from_str::<Verdict>("\"maybe\"").is_err());
    }

    #[test]
    fn test_serialized_results_round_trip() {
        let mut constraint = Constraint::new(3, "Is it short?");
        constraint.resolve(Verdict::Pass, "fine", EvalMethod::Rule);

        let json = serde_json::to_value(&constraint).unwrap();
        assert_eq!(json["result"], "pass");
        assert_eq!(json["method"], "rule");

        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, constraint);
    }
}
