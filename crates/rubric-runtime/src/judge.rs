//! Semantic judging of constraints that carry no rule.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use rubric_core::RuleOutcome;

use crate::prompts;
use crate::providers::BatchGenerator;
use crate::resilience::run_batches;

lazy_static! {
    static ref VERDICT: Regex = Regex::new(r"(?i)verdict[\s*]*[:：][\s*]*(yes|no)\b").unwrap();
}

/// One question for the judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeRequest {
    pub instruction: String,
    /// The full response
    pub response: String,
    /// The extracted part the requirement targets, if any
    pub fragment: Option<String>,
    pub question: String,
}

impl JudgeRequest {
    pub fn prompt(&self) -> String {
        prompts::judge_prompt(&self.instruction, &self.response, self.fragment.as_deref(), &self.question)
    }
}

/// Read the verdict token out of a judge reply.
///
/// The last `Verdict: YES|NO` wins. A reply without one fails. The raw reply
/// is kept as the explanation either way.
pub fn parse_verdict(reply: &str) -> RuleOutcome {
    let last = VERDICT
        .captures_iter(reply)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().eq_ignore_ascii_case("yes"));

    match last {
        Some(true) => RuleOutcome::pass(reply.trim()),
        Some(false) => RuleOutcome::fail(reply.trim()),
        None => RuleOutcome::fail(format!("No verdict found in judge reply: {}", reply.trim())),
    }
}

/// Sends judge prompts in order-aligned batches.
#[derive(Clone)]
pub struct SemanticJudge {
    judge: Arc<dyn BatchGenerator>,
    batch_size: usize,
    concurrency: usize,
}

impl SemanticJudge {
    pub fn new(judge: Arc<dyn BatchGenerator>, batch_size: usize, concurrency: usize) -> Self {
        Self { judge, batch_size, concurrency }
    }

    /// Judge every request; one outcome per request, in order.
    pub async fn judge(&self, requests: &[JudgeRequest]) -> Vec<RuleOutcome> {
        if requests.is_empty() {
            return Vec::new();
        }

        let prompts = requests.iter().map(JudgeRequest::prompt).collect();
        run_batches(self.judge.as_ref(), prompts, self.batch_size, self.concurrency)
            .await
            .into_iter()
            .map(|reply| match reply {
                Ok(text) => parse_verdict(&text),
                Err(e) => RuleOutcome::fail(format!("Judge call failed: {e}")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::ScriptedGenerator;

    fn request(question: &str) -> JudgeRequest {
        JudgeRequest {
            instruction: "Write a greeting".into(),
            response: "Hello there".into(),
            fragment: None,
            question: question.into(),
        }
    }

    #[test]
    fn test_parse_verdict_variants() {
        assert!(parse_verdict("Looks fine.\nVerdict: YES").passed);
        assert!(!parse_verdict("Verdict: no").passed);
        assert!(parse_verdict("verdict：yes").passed);
        assert!(parse_verdict("**Verdict:** **YES**").passed);
    }

    #[test]
    fn test_last_verdict_wins() {
        let outcome = parse_verdict("At first, Verdict: NO. On reflection...\nVerdict: YES");
        assert!(outcome.passed);
        assert!(outcome.explanation.contains("On reflection"));
    }

    #[test]
    fn test_missing_verdict_fails_with_raw_text() {
        let outcome = parse_verdict("I am not sure.");
        assert!(!outcome.passed);
        assert!(outcome.explanation.contains("I am not sure."));
    }

    #[tokio::test]
    async fn test_judge_aligns_outcomes() {
        let generator = Arc::new(ScriptedGenerator::new("judge", |prompt| {
            if prompt.contains("greeting?") {
                Ok("Verdict: YES".to_string())
            } else {
                Ok("Verdict: NO".to_string())
            }
        }));
        let judge = SemanticJudge::new(generator.clone(), 2, 1);

        let outcomes = judge
            .judge(&[request("Is it a greeting?"), request("Is it a poem?"), request("Is it a greeting?")])
            .await;
        let passed: Vec<bool> = outcomes.iter().map(|o| o.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_only_that_request() {
        let generator = Arc::new(ScriptedGenerator::new("judge", |prompt| {
            if prompt.contains("poem") {
                Err(ProviderError::CallFailed("overloaded".into()))
            } else {
                Ok("Verdict: YES".to_string())
            }
        }));
        let judge = SemanticJudge::new(generator, 10, 1);

        let outcomes = judge.judge(&[request("Is it a greeting?"), request("Is it a poem?")]).await;
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert!(outcomes[1].explanation.starts_with("Judge call failed"));
    }

    #[tokio::test]
    async fn test_empty_request_list_makes_no_call() {
        let generator = Arc::new(ScriptedGenerator::echo("judge"));
        let judge = SemanticJudge::new(generator.clone(), 10, 1);
        assert!(judge.judge(&[]).await.is_empty());
        assert!(generator.calls().is_empty());
    }
}
