//! Dependency-level scheduling of constraint evaluation.
//!
//! Constraints are pooled by dependency level across every item in the
//! working set. Level `L + 1` starts only after all level `L` work has a
//! verdict. Within a level, rule-bearing and semantic constraints form
//! separate sub-batches.
//!
//! Schema placeholders are expanded before the first level and spliced into
//! their item's constraint list after the last.

use std::collections::{BTreeMap, HashMap};

use rubric_core::schema;
use rubric_core::{dependency_levels, Constraint, EvalMethod, Fragment, Item, Verdict};

use crate::judge::JudgeRequest;
use crate::registry::{EvaluatorRegistry, RuleTask};

/// Location of a pending constraint: item index and constraint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Ticket {
    item: usize,
    slot: usize,
}

/// Counters from one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub levels: usize,
    pub rule_evaluations: usize,
    pub semantic_evaluations: usize,
    /// Constraints failed because a dependency failed
    pub short_circuited: usize,
    /// Constraints failed because their fragment was invalid
    pub invalid_fragments: usize,
    /// Field constraints produced by schema expansion
    pub expanded: usize,
}

/// Evaluates every constraint of a working set, level by level.
#[derive(Clone)]
pub struct LevelScheduler {
    registry: EvaluatorRegistry,
    batch_size: usize,
}

enum Prepared {
    Resolved(Verdict, String, EvalMethod),
    Rule(RuleTask),
    Semantic(JudgeRequest),
}

impl LevelScheduler {
    pub fn new(registry: EvaluatorRegistry, batch_size: usize) -> Self {
        Self { registry, batch_size: batch_size.max(1) }
    }

    /// Evaluate all constraints of `items` in place.
    ///
    /// Existing verdicts are cleared first. Fragments must already be
    /// resolved by the extraction pass.
    pub async fn run(&self, items: &mut [Item]) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let mut pool: BTreeMap<usize, Vec<Ticket>> = BTreeMap::new();
        let mut expansions: HashMap<Ticket, Vec<Constraint>> = HashMap::new();

        for (index, item) in items.iter_mut().enumerate() {
            item.constraints.iter_mut().for_each(Constraint::reset);

            let levels = match dependency_levels(&item.constraints) {
                Ok(levels) => levels,
                Err(e) => {
                    tracing::warn!(item = index, error = %e, "Dependency graph rejected, failing item");
                    for constraint in &mut item.constraints {
                        constraint.resolve(Verdict::Fail, format!("dependency graph invalid: {e}"), EvalMethod::Dependency);
                    }
                    continue;
                }
            };

            let mut next_id = -1;
            for slot in 0..item.constraints.len() {
                let ticket = Ticket { item: index, slot };
                if item.constraints[slot].is_schema_document() {
                    let expanded = expand_placeholder(item, slot, &mut next_id);
                    report.expanded += expanded.len();
                    if !expanded.is_empty() {
                        expansions.insert(ticket, expanded);
                    }
                } else {
                    pool.entry(levels[slot]).or_default().push(ticket);
                }
            }
        }

        for (level, tickets) in &pool {
            self.run_level(*level, tickets, items, &mut report).await;
            report.levels += 1;
        }

        splice(items, expansions);
        report
    }

    async fn run_level(&self, level: usize, tickets: &[Ticket], items: &mut [Item], report: &mut ScheduleReport) {
        let mut rules = Vec::new();
        let mut semantic = Vec::new();
        let mut short_circuited = 0;

        for ticket in tickets {
            match prepare(&items[ticket.item], ticket.slot) {
                Prepared::Resolved(verdict, explanation, method) => {
                    match method {
                        EvalMethod::Dependency => short_circuited += 1,
                        _ => report.invalid_fragments += 1,
                    }
                    items[ticket.item].constraints[ticket.slot].resolve(verdict, explanation, method);
                }
                Prepared::Rule(task) => rules.push((*ticket, task)),
                Prepared::Semantic(request) => semantic.push((*ticket, request)),
            }
        }

        for chunk in rules.chunks(self.batch_size) {
            let tasks: Vec<RuleTask> = chunk.iter().map(|(_, task)| task.clone()).collect();
            let outcomes = self.registry.evaluate_rules(&tasks);
            for ((ticket, _), outcome) in chunk.iter().zip(outcomes) {
                items[ticket.item].constraints[ticket.slot].resolve(
                    Verdict::from_passed(outcome.passed),
                    outcome.explanation,
                    EvalMethod::Rule,
                );
            }
        }

        if !semantic.is_empty() {
            let requests: Vec<JudgeRequest> = semantic.iter().map(|(_, request)| request.clone()).collect();
            let outcomes = self.registry.evaluate_semantic(&requests).await;
            for ((ticket, _), outcome) in semantic.iter().zip(outcomes) {
                items[ticket.item].constraints[ticket.slot].resolve(
                    Verdict::from_passed(outcome.passed),
                    outcome.explanation,
                    EvalMethod::Model,
                );
            }
        }

        tracing::info!(
            level = level,
            rule = rules.len(),
            semantic = semantic.len(),
            short_circuited,
            "Level evaluated"
        );

        report.rule_evaluations += rules.len();
        report.semantic_evaluations += semantic.len();
        report.short_circuited += short_circuited;
    }
}

/// Expand one schema placeholder and resolve it from its field results.
///
/// The placeholder passes iff every field constraint passes.
fn expand_placeholder(item: &mut Item, slot: usize, next_id: &mut i64) -> Vec<Constraint> {
    let Some(document) = &item.schema else {
        item.constraints[slot].resolve(Verdict::Fail, "no schema document attached", EvalMethod::Schema);
        return Vec::new();
    };

    let mut expanded = schema::expand(document, item.response_text());
    for constraint in &mut expanded {
        constraint.point_id = *next_id;
        *next_id -= 1;
    }

    let failed: Vec<String> = expanded.iter().filter(|c| c.failed()).map(|c| c.point_id.to_string()).collect();
    let placeholder = &mut item.constraints[slot];
    if failed.is_empty() {
        placeholder.resolve(Verdict::Pass, format!("all {} schema fields passed", expanded.len()), EvalMethod::Schema);
    } else {
        placeholder.resolve(
            Verdict::Fail,
            format!("{} of {} schema fields failed: {}", failed.len(), expanded.len(), failed.join(", ")),
            EvalMethod::Schema,
        );
    }
    expanded
}

fn prepare(item: &Item, slot: usize) -> Prepared {
    let constraint = &item.constraints[slot];

    let failed: Vec<String> = constraint
        .dependencies
        .iter()
        .filter(|dep| item.constraint(**dep).map_or(true, Constraint::failed))
        .map(i64::to_string)
        .collect();
    if !failed.is_empty() {
        return Prepared::Resolved(
            Verdict::Fail,
            format!("dependency failed: point {}", failed.join(", ")),
            EvalMethod::Dependency,
        );
    }

    let response = item.response_text();
    let fragment = match constraint.extraction.as_ref().and_then(|key| item.fragments.get(key)) {
        Some(Fragment::Invalid(reason)) => {
            return Prepared::Resolved(Verdict::Fail, format!("extraction invalid: {reason}"), EvalMethod::Extraction);
        }
        Some(Fragment::Parts(parts)) => Some(parts),
        None => None,
    };

    match &constraint.rule {
        Some(kind) => Prepared::Rule(RuleTask {
            kind: kind.clone(),
            fragment: fragment.cloned().unwrap_or_else(|| vec![response.to_string()]),
            instruction: item.original_question.clone(),
            response: response.to_string(),
        }),
        None => Prepared::Semantic(JudgeRequest {
            instruction: item.original_question.clone(),
            response: response.to_string(),
            fragment: fragment.map(|parts| parts.join("\n")),
            question: constraint.question.clone(),
        }),
    }
}

/// Replace each placeholder with its field constraints, highest slot first
/// so earlier slots stay valid.
fn splice(items: &mut [Item], expansions: HashMap<Ticket, Vec<Constraint>>) {
    let mut ordered: Vec<(Ticket, Vec<Constraint>)> = expansions.into_iter().collect();
    ordered.sort_by(|(a, _), (b, _)| b.cmp(a));

    for (ticket, expanded) in ordered {
        items[ticket.item].constraints.splice(ticket.slot..=ticket.slot, expanded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::SemanticJudge;
    use crate::testing::ScriptedGenerator;
    use rubric_core::RuleRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn scheduler(judge: Arc<ScriptedGenerator>, batch_size: usize) -> LevelScheduler {
        let registry = EvaluatorRegistry::new(RuleRegistry::new(), SemanticJudge::new(judge, batch_size, 1));
        LevelScheduler::new(registry, batch_size)
    }

    fn keyword(id: i64, word: &str) -> Constraint {
        Constraint::new(id, format!("Does it mention {word}?")).with_rule(format!(r#"keyword:["{word}"]"#).parse().unwrap())
    }

    #[tokio::test]
    async fn test_dependency_failure_skips_evaluator() {
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: YES"));
        let mut items = vec![Item::new("Greet me")
            .with_response("Good morning")
            .with_constraint(keyword(1, "hello"))
            .with_constraint(Constraint::new(2, "Is it polite?").depends_on([1]))];

        let report = scheduler(judge.clone(), 10).run(&mut items).await;

        let c2 = items[0].constraint(2).unwrap();
        assert_eq!(c2.result, Verdict::Fail);
        assert_eq!(c2.method, EvalMethod::Dependency);
        assert!(c2.explanation.contains("dependency failed"));
        assert!(judge.calls().is_empty());
        assert_eq!(report.short_circuited, 1);
    }

    #[tokio::test]
    async fn test_levels_run_in_order_across_items() {
        // Level 1 prompts must only be sent after every level 0 verdict exists
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: YES"));
        let mut items: Vec<Item> = (0..3)
            .map(|i| {
                Item::new(format!("q{i}"))
                    .with_response("hello")
                    .with_constraint(Constraint::new(1, "level zero?"))
                    .with_constraint(Constraint::new(2, "level one?").depends_on([1]))
            })
            .collect();

        let report = scheduler(judge.clone(), 100).run(&mut items).await;

        let calls = judge.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].iter().all(|p| p.contains("level zero?")));
        assert!(calls[1].iter().all(|p| p.contains("level one?")));
        assert_eq!(report.levels, 2);
        assert!(items.iter().all(|item| !item.has_failures()));
    }

    #[tokio::test]
    async fn test_rule_chunks_respect_batch_size() {
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: NO"));
        let mut items = vec![Item::new("q")
            .with_response("hello world")
            .with_constraint(keyword(1, "hello"))
            .with_constraint(keyword(2, "world"))
            .with_constraint(keyword(3, "moon"))
            .with_constraint(Constraint::new(4, "Is it cheerful?"))];

        let report = scheduler(judge.clone(), 2).run(&mut items).await;

        assert_eq!(report.rule_evaluations, 3);
        assert_eq!(report.semantic_evaluations, 1);
        assert_eq!(items[0].constraint(3).unwrap().result, Verdict::Fail);
        assert_eq!(items[0].constraint(4).unwrap().method, EvalMethod::Model);
        assert_eq!(judge.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_fragment_fails_without_evaluation() {
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: YES"));
        let mut item = Item::new("q")
            .with_response("text")
            .with_constraint(Constraint::new(1, "Is the title short?").with_extraction("title"));
        item.fragments.insert("title".into(), Fragment::Invalid("no title".into()));
        let mut items = vec![item];

        scheduler(judge.clone(), 10).run(&mut items).await;

        let c = items[0].constraint(1).unwrap();
        assert_eq!(c.result, Verdict::Fail);
        assert_eq!(c.method, EvalMethod::Extraction);
        assert_eq!(c.explanation, "extraction invalid: no title");
        assert!(judge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fragment_parts_are_judged() {
        let judge = Arc::new(ScriptedGenerator::new("judge", |prompt| {
            let full = prompt.contains("[Response under review]\npreamble, first part, second part\n");
            let focus = prompt.contains("applies to]\nfirst part\nsecond part\n");
            if full && focus {
                Ok("Verdict: YES".to_string())
            } else {
                Ok("Verdict: NO".to_string())
            }
        }));
        let mut item = Item::new("q")
            .with_response("preamble, first part, second part")
            .with_constraint(Constraint::new(1, "Are both parts present?").with_extraction("parts"));
        item.fragments
            .insert("parts".into(), Fragment::Parts(vec!["first part".into(), "second part".into()]));
        let mut items = vec![item];

        scheduler(judge, 10).run(&mut items).await;
        assert_eq!(items[0].constraint(1).unwrap().result, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_schema_placeholder_spliced_in_place() {
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: YES"));
        let schema = json!({
            "type": "object",
            "required": ["name", "age"],
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
        });
        let mut items = vec![Item::new("Describe a person as JSON")
            .with_response(r#"{"name": "Ada", "age": 36}"#)
            .with_schema(schema)
            .with_constraint(keyword(1, "Ada"))
            .with_constraint(Constraint::new(2, "Matches schema?").with_rule("SCHEMA:json_schema".parse().unwrap()))
            .with_constraint(Constraint::new(3, "Is it accurate?").depends_on([2]))];

        let report = scheduler(judge.clone(), 10).run(&mut items).await;

        let ids: Vec<i64> = items[0].constraints.iter().map(|c| c.point_id).collect();
        assert_eq!(ids, vec![1, -1, -2, 3]);
        assert_eq!(report.expanded, 2);
        assert_eq!(items[0].constraint(3).unwrap().method, EvalMethod::Model);
        assert!(!items[0].has_failures());
    }

    #[tokio::test]
    async fn test_failed_schema_placeholder_blocks_dependents() {
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: YES"));
        let schema = json!({"type": "object", "required": ["x"], "properties": {"x": {"type": "number"}}});
        let mut items = vec![Item::new("q")
            .with_response("not json")
            .with_schema(schema)
            .with_constraint(Constraint::new(1, "Schema?").with_rule("SCHEMA:json_schema".parse().unwrap()))
            .with_constraint(Constraint::new(2, "Is x sensible?").depends_on([1]))];

        scheduler(judge.clone(), 10).run(&mut items).await;

        let constraints = &items[0].constraints;
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].point_id, -1);
        assert!(constraints[0].explanation.contains("parsing failed"));
        assert_eq!(constraints[1].method, EvalMethod::Dependency);
        assert!(judge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_two_placeholders_get_distinct_ids() {
        let judge = Arc::new(ScriptedGenerator::constant("judge", "Verdict: YES"));
        let schema = json!({"type": "object", "required": ["x"], "properties": {"x": {"type": "number"}}});
        let placeholder = |id| Constraint::new(id, "Schema?").with_rule("SCHEMA:json_schema".parse().unwrap());
        let mut items = vec![Item::new("q")
            .with_response(r#"{"x": 1}"#)
            .with_schema(schema)
            .with_constraint(placeholder(1))
            .with_constraint(placeholder(2))];

        scheduler(judge, 10).run(&mut items).await;
        let ids: Vec<i64> = items[0].constraints.iter().map(|c| c.point_id).collect();
        assert_eq!(ids, vec![-1, -2]);
    }
}
