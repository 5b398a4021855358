//! Extraction pass: resolve the fragment each constraint is judged against.

use std::collections::BTreeSet;
use std::sync::Arc;

use rubric_core::extraction::{extract_list, extract_path, parse_extraction_reply};
use rubric_core::{ExtractionDirective, ExtractionProgram, Fragment, Item};

use crate::prompts;
use crate::providers::BatchGenerator;
use crate::resilience::run_batches;

/// A directive that needs the extractor.
struct Job {
    item: usize,
    key: String,
    prompt: String,
}

/// Resolves item directives into fragments before scheduling.
///
/// Structural directives are resolved locally. Model-guided and programmatic
/// directives are sent to the extractor in separate batch streams.
#[derive(Clone)]
pub struct ExtractionPreprocessor {
    extractor: Arc<dyn BatchGenerator>,
    batch_size: usize,
    concurrency: usize,
}

impl ExtractionPreprocessor {
    pub fn new(extractor: Arc<dyn BatchGenerator>, batch_size: usize, concurrency: usize) -> Self {
        Self { extractor, batch_size, concurrency }
    }

    /// Replace every item's fragments with freshly resolved ones.
    ///
    /// Only directives referenced by a non-schema constraint are resolved.
    /// Failures never escape: they become [`Fragment::Invalid`].
    pub async fn run(&self, items: &mut [Item]) {
        let mut guided = Vec::new();
        let mut programmatic = Vec::new();

        for (index, item) in items.iter_mut().enumerate() {
            item.fragments.clear();
            let response = item.response_text().to_string();

            for key in referenced_keys(item) {
                let Some(directive) = item.directives.get(&key) else {
                    continue;
                };
                match directive {
                    ExtractionDirective::StructuralPath(path) => {
                        tracing::debug!(key = %key, path = %path, "Structural path extraction");
                        item.fragments.insert(key.clone(), extract_path(&response, path).into());
                    }
                    ExtractionDirective::StructuralList(_) => {
                        item.fragments.insert(key.clone(), extract_list(&response).into());
                    }
                    ExtractionDirective::ModelGuided(text) => guided.push(Job {
                        item: index,
                        prompt: prompts::extraction_prompt(item.is_single_target(), &item.original_question, &response, text),
                        key,
                    }),
                    ExtractionDirective::Programmatic(text) => programmatic.push(Job {
                        item: index,
                        prompt: prompts::program_prompt(item.is_single_target(), &item.original_question, &response, text),
                        key,
                    }),
                }
            }
        }

        tracing::debug!(
            model_guided = guided.len(),
            programmatic = programmatic.len(),
            "Extraction jobs collected"
        );

        let guided_replies = self.dispatch(&guided).await;
        for (job, reply) in guided.into_iter().zip(guided_replies) {
            let item = &mut items[job.item];
            let fragment = match reply {
                Ok(text) => parse_extraction_reply(&text, item.response_text()),
                Err(e) => Fragment::Invalid(e),
            };
            item.fragments.insert(job.key, fragment);
        }

        let program_replies = self.dispatch(&programmatic).await;
        for (job, reply) in programmatic.into_iter().zip(program_replies) {
            let item = &mut items[job.item];
            let fragment = match reply {
                Ok(text) => ExtractionProgram::parse(&text)
                    .map(|program| program.run(item.response_text()))
                    .into(),
                Err(e) => Fragment::Invalid(e),
            };
            item.fragments.insert(job.key, fragment);
        }
    }

    async fn dispatch(&self, jobs: &[Job]) -> Vec<Result<String, String>> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let prompts = jobs.iter().map(|job| job.prompt.clone()).collect();
        run_batches(self.extractor.as_ref(), prompts, self.batch_size, self.concurrency)
            .await
            .into_iter()
            .map(|reply| reply.map_err(|e| format!("Extractor call failed: {e}")))
            .collect()
    }
}

fn referenced_keys(item: &Item) -> BTreeSet<String> {
    item.constraints
        .iter()
        .filter(|c| !c.is_schema_document())
        .filter_map(|c| c.extraction.clone())
        .collect()
}
