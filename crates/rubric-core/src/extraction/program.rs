//! Extraction programs: small step pipelines written by the extractor.
//!
//! A program is a JSON list of steps (or `{"steps": [...]}`) applied to the
//! response, starting from a single-element list holding the raw text.
//! Steps only split, filter and slice text, so a program cannot reach
//! anything outside the response it is given.
//!
//! ```json
//! [{"op": "lines"}, {"op": "strip_numbering"}, {"op": "drop_empty"}, {"op": "take", "count": 3}]
//! ```

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ExtractionError;
use crate::rules::patterns::strip_list_marker;
use crate::schema::parse_structured;

const MAX_STEPS: usize = 32;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Split every element into lines
    Lines,
    /// Split every element on a separator
    Split { separator: String },
    /// Replace every element with its matches (or a capture group)
    Regex {
        pattern: String,
        #[serde(default)]
        group: usize,
    },
    Trim,
    DropEmpty,
    /// Remove leading `1.`, `-`, `*` markers
    StripNumbering,
    Take { count: usize },
    Skip { count: usize },
}

#[derive(Debug, Clone)]
enum Op {
    Plain(Step),
    Regex(Regex, usize),
}

/// A validated, ready-to-run extraction program.
#[derive(Debug, Clone)]
pub struct ExtractionProgram {
    steps: Vec<Step>,
    ops: Vec<Op>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProgramDoc {
    Steps(Vec<Step>),
    Wrapped { steps: Vec<Step> },
}

impl ExtractionProgram {
    /// Build a program from steps, compiling any patterns.
    pub fn new(steps: Vec<Step>) -> Result<Self, ExtractionError> {
        if steps.len() > MAX_STEPS {
            return Err(ExtractionError::InvalidProgram(format!(
                "{} steps exceeds the limit of {MAX_STEPS}",
                steps.len()
            )));
        }

        let ops = steps
            .iter()
            .map(|step| match step {
                Step::Regex { pattern, group } => RegexBuilder::new(pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map(|re| Op::Regex(re, *group))
                    .map_err(|e| ExtractionError::InvalidProgram(format!("bad pattern: {e}"))),
                other => Ok(Op::Plain(other.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { steps, ops })
    }

    /// Parse an extractor reply into a program.
    pub fn parse(text: &str) -> Result<Self, ExtractionError> {
        let value: Value =
            parse_structured(text).map_err(|e| ExtractionError::InvalidProgram(e.to_string()))?;
        let doc: ProgramDoc = serde_json::from_value(value)
            .map_err(|e| ExtractionError::InvalidProgram(e.to_string()))?;
        let steps = match doc {
            ProgramDoc::Steps(steps) | ProgramDoc::Wrapped { steps } => steps,
        };
        Self::new(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run the program on a response.
    pub fn run(&self, response: &str) -> Vec<String> {
        let mut items = vec![response.to_string()];
        for op in &self.ops {
            items = apply(op, items);
        }
        items
    }
}

fn apply(op: &Op, items: Vec<String>) -> Vec<String> {
    match op {
        Op::Regex(re, group) => items
            .iter()
            .flat_map(|item| {
                re.captures_iter(item)
                    .filter_map(|caps| caps.get(*group).map(|m| m.as_str().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect(),
        Op::Plain(step) => match step {
            Step::Lines => items
                .iter()
                .flat_map(|item| item.lines().map(str::to_string).collect::<Vec<_>>())
                .collect(),
            Step::Split { separator } if separator.is_empty() => items,
            Step::Split { separator } => items
                .iter()
                .flat_map(|item| item.split(separator.as_str()).map(str::to_string).collect::<Vec<_>>())
                .collect(),
            Step::Trim => items.into_iter().map(|s| s.trim().to_string()).collect(),
            Step::DropEmpty => items.into_iter().filter(|s| !s.trim().is_empty()).collect(),
            Step::StripNumbering => items
                .into_iter()
                .map(|s| strip_list_marker(&s).to_string())
                .collect(),
            Step::Take { count } => items.into_iter().take(*count).collect(),
            Step::Skip { count } => items.into_iter().skip(*count).collect(),
            Step::Regex { .. } => items,
        },
    }
}
