//! # rubric-runtime
//!
//! Batched evaluation and multi-round correction for Rubric.
//!
//! `rubric-core` decides what a constraint means. This crate decides when and
//! how it gets evaluated: it resolves fragments through the extraction model,
//! sends semantic constraints to a judge, schedules constraints by dependency
//! level and drives correction rounds over the failing items.
//!
//! External models are reached only through [`BatchGenerator`]; this crate
//! ships no network clients.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rubric_core::{Dataset, RuleRegistry};
//! use rubric_runtime::{Capabilities, DirectorySnapshots, EngineConfig, RoundController};
//!
//! let config = EngineConfig::from_yaml_file("rubric.yaml")?;
//! let items = Dataset::from_file("dataset.json")?.into_items();
//!
//! let controller = RoundController::new(
//!     Capabilities::with_grader(subject, grader),
//!     RuleRegistry::new(),
//!     Arc::new(DirectorySnapshots::new(&config.output_dir)),
//!     config,
//! )?;
//! let report = controller.run(items).await?;
//! println!("score: {:.3}", report.stats.score);
//! ```

pub mod config;
pub mod controller;
pub mod extraction;
pub mod judge;
pub mod prompts;
pub mod providers;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod snapshot;
pub mod testing;

use thiserror::Error;

pub use config::{ConfigError, EngineConfig, RetryConfig};
pub use controller::{RoundController, RunReport};
pub use extraction::ExtractionPreprocessor;
pub use judge::{parse_verdict, JudgeRequest, SemanticJudge};
pub use providers::{BatchGenerator, Capabilities, ProviderError};
pub use registry::{EvaluatorRegistry, RuleTask};
pub use resilience::{generate_with_fallback, run_batches, RetryingGenerator};
pub use scheduler::{LevelScheduler, ScheduleReport};
pub use snapshot::{load_snapshot, DirectorySnapshots, MemorySnapshots, SnapshotError, SnapshotSink};

/// Errors that stop a run before its first round.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid dataset: {0}")]
    Invalid(#[from] rubric_core::DatasetError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
