//! Evaluator registry: rule functions plus the semantic judge.

use rubric_core::{RuleContext, RuleKind, RuleOutcome, RuleRegistry};

use crate::judge::{JudgeRequest, SemanticJudge};

/// One rule evaluation, detached from the item it came from.
#[derive(Debug, Clone)]
pub struct RuleTask {
    pub kind: RuleKind,
    pub fragment: Vec<String>,
    pub instruction: String,
    pub response: String,
}

/// Dispatches constraints to the evaluator their kind calls for.
#[derive(Clone)]
pub struct EvaluatorRegistry {
    rules: RuleRegistry,
    judge: SemanticJudge,
}

impl EvaluatorRegistry {
    pub fn new(rules: RuleRegistry, judge: SemanticJudge) -> Self {
        Self { rules, judge }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Evaluate rule-bearing constraints. Never fails as a whole.
    pub fn evaluate_rules(&self, tasks: &[RuleTask]) -> Vec<RuleOutcome> {
        tasks
            .iter()
            .map(|task| {
                let ctx = RuleContext { instruction: &task.instruction, response: &task.response };
                self.rules.evaluate(&task.kind, &task.fragment, ctx)
            })
            .collect()
    }

    /// Judge rule-absent constraints.
    pub async fn evaluate_semantic(&self, requests: &[JudgeRequest]) -> Vec<RuleOutcome> {
        self.judge.judge(requests).await
    }
}
