//! # rubric-core
//!
//! Deterministic constraint model for instruction-following evaluation.
//!
//! An evaluation [`Item`] pairs a prompt and its response with a list of
//! [`Constraint`]s. This crate holds everything that needs no model calls:
//!
//! - Parsing rule specifiers into [`RuleKind`] and running them via [`RuleRegistry`]
//! - Computing dependency levels over an item's constraints
//! - Expanding schema documents into per-field synthetic constraints
//! - Resolving structural extraction directives and extraction programs
//! - Loading and validating datasets
//! - Computing per-round scores and capability rollups
//!
//! ## Example
//!
//! ```rust,ignore
//! use rubric_core::{Dataset, schema};
//!
//! let dataset = Dataset::from_file("items.json")?;
//! for item in &dataset.items {
//!     if let Some(doc) = &item.schema {
//!         for c in schema::expand(doc, item.response_text()) {
//!             println!("{} {:?} {}", c.point_id, c.result, c.explanation);
//!         }
//!     }
//! }
//! ```

pub mod dataset;
pub mod extraction;
pub mod graph;
pub mod rules;
pub mod schema;
pub mod stats;
pub mod types;

// Re-export main types at crate root
pub use dataset::{validate_items, Dataset, DatasetError, ItemError};
pub use extraction::{ExtractionDirective, ExtractionError, ExtractionProgram, Fragment};
pub use graph::{dependency_levels, GraphError};
pub use rules::{
    Bounds, RuleContext, RuleError, RuleKind, RuleOutcome, RulePlugin, RuleRegistry, SchemaTarget,
};
pub use schema::{SchemaError, ValidationPoint};
pub use stats::{CapabilityNode, CapabilityTree, RoundStats, TagCounts};
pub use types::{Constraint, EvalMethod, Item, Verdict};
