//! Round controller: generation, evaluation and correction rounds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rubric_core::{validate_items, CapabilityTree, Item, RoundStats, RuleRegistry};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::extraction::ExtractionPreprocessor;
use crate::judge::SemanticJudge;
use crate::prompts;
use crate::providers::{BatchGenerator, Capabilities};
use crate::registry::EvaluatorRegistry;
use crate::resilience::{run_batches, RetryingGenerator};
use crate::scheduler::{LevelScheduler, ScheduleReport};
use crate::snapshot::SnapshotSink;
use crate::RunError;

/// Outcome of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Rounds persisted, including an early-stop round
    pub rounds_run: usize,
    /// Whether the run stopped because nothing was failing
    pub converged: bool,
    /// The authoritative snapshot after the last round
    pub snapshot: Vec<Item>,
    pub stats: RoundStats,
}

/// Drives rounds over an item set.
pub struct RoundController {
    subject: Arc<dyn BatchGenerator>,
    extraction: ExtractionPreprocessor,
    scheduler: LevelScheduler,
    sink: Arc<dyn SnapshotSink>,
    config: EngineConfig,
    tree: CapabilityTree,
}

impl RoundController {
    /// Build a controller. Every capability is wrapped in the configured
    /// retry policy, if any.
    pub fn new(
        capabilities: Capabilities,
        rules: RuleRegistry,
        sink: Arc<dyn SnapshotSink>,
        config: EngineConfig,
    ) -> Result<Self, RunError> {
        config.validate()?;

        let wrap = |generator: Arc<dyn BatchGenerator>| -> Arc<dyn BatchGenerator> {
            match &config.retry {
                Some(policy) => Arc::new(RetryingGenerator::new(generator, policy.clone())),
                None => generator,
            }
        };
        let subject = wrap(capabilities.subject);
        let extractor = wrap(capabilities.extractor);
        let judge = wrap(capabilities.judge);

        let batch_size = config.batch_size;
        let concurrency = config.max_concurrent_batches;
        let registry = EvaluatorRegistry::new(rules, SemanticJudge::new(judge, batch_size, concurrency));

        Ok(Self {
            subject,
            extraction: ExtractionPreprocessor::new(extractor, batch_size, concurrency),
            scheduler: LevelScheduler::new(registry, batch_size),
            sink,
            tree: config.tree(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run extraction and level scheduling over a working set.
    pub async fn evaluate(&self, items: &mut [Item]) -> ScheduleReport {
        self.extraction.run(items).await;
        self.scheduler.run(items).await
    }

    /// Run every round over `items`.
    ///
    /// Items are validated before the first round; nothing after that
    /// aborts the run.
    pub async fn run(&self, mut items: Vec<Item>) -> Result<RunReport, RunError> {
        let started_at = Utc::now();

        items.iter_mut().for_each(Item::ensure_identity);
        validate_items(&items)?;

        let blueprints: HashMap<String, Item> = items
            .iter()
            .map(|item| (item.original_question.clone(), item.blueprint()))
            .collect();

        let missing: Vec<usize> = (0..items.len()).filter(|i| items[*i].response.is_none()).collect();
        tracing::info!(items = items.len(), generate = missing.len(), "Round 1: generating responses");
        self.generate(&mut items, &missing).await;

        let report = self.evaluate(&mut items).await;
        tracing::info!(round = 1, levels = report.levels, expanded = report.expanded, "Round evaluated");

        let mut snapshot = items;
        let mut stats = self.persist(1, &snapshot);
        let mut rounds_run = 1;
        let mut converged = false;

        for round in 2..=self.config.rounds {
            let failing: Vec<usize> = (0..snapshot.len()).filter(|i| snapshot[*i].has_failures()).collect();
            rounds_run = round;

            if failing.is_empty() {
                tracing::info!(round, "No failing items, stopping early");
                stats = self.persist(round, &snapshot);
                converged = true;
                break;
            }

            let mut working: Vec<Item> = failing
                .iter()
                .map(|i| correction_item(&snapshot[*i], &blueprints))
                .collect();
            tracing::info!(round, items = working.len(), "Regenerating failing items");

            let all: Vec<usize> = (0..working.len()).collect();
            self.generate(&mut working, &all).await;
            let report = self.evaluate(&mut working).await;
            tracing::info!(round, levels = report.levels, expanded = report.expanded, "Round evaluated");

            merge(&mut snapshot, working);
            stats = self.persist(round, &snapshot);
        }

        if !converged {
            converged = !snapshot.iter().any(Item::has_failures);
        }

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            rounds_run,
            converged,
            snapshot,
            stats,
        })
    }

    /// Generate responses for the given item indexes. A failed generation
    /// leaves the response absent.
    async fn generate(&self, items: &mut [Item], indexes: &[usize]) {
        if indexes.is_empty() {
            return;
        }

        let prompts = indexes.iter().map(|i| items[*i].question.clone()).collect();
        let replies = run_batches(
            self.subject.as_ref(),
            prompts,
            self.config.batch_size,
            self.config.max_concurrent_batches,
        )
        .await;

        for (index, reply) in indexes.iter().zip(replies) {
            match reply {
                Ok(text) => items[*index].response = Some(text),
                Err(e) => {
                    tracing::warn!(
                        item = %items[*index].original_question,
                        error = %e,
                        "Response generation failed"
                    );
                    items[*index].response = None;
                }
            }
        }
    }

    fn persist(&self, round: usize, items: &[Item]) -> RoundStats {
        let stats = RoundStats::from_items(round, items, &self.tree);
        if let Err(e) = self.sink.persist(round, items, &stats) {
            tracing::warn!(round, error = %e, "Failed to persist snapshot");
        }
        tracing::info!(round, score = stats.score, strict_score = stats.strict_score, "Round persisted");
        stats
    }
}

/// Build a fresh working copy of a failing item whose question asks for a
/// corrected answer.
fn correction_item(previous: &Item, blueprints: &HashMap<String, Item>) -> Item {
    let mut item = blueprints
        .get(&previous.original_question)
        .cloned()
        .unwrap_or_else(|| previous.blueprint());

    item.question = prompts::correction_prompt(
        &item.question,
        previous
            .failing()
            .map(|c| (c.question.as_str(), c.explanation.as_str())),
        previous.response_text(),
    );
    item
}

/// Write working items back into the snapshot by identity.
fn merge(snapshot: &mut [Item], working: Vec<Item>) {
    let index: HashMap<String, usize> = snapshot
        .iter()
        .enumerate()
        .map(|(i, item)| (item.original_question.clone(), i))
        .collect();

    for item in working {
        match index.get(&item.original_question) {
            Some(&i) => snapshot[i] = item,
            None => tracing::warn!(item = %item.original_question, "Working item has no snapshot entry"),
        }
    }
}
