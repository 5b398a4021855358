//! Schema documents: lenient response parsing and field-level expansion.
//!
//! A `SCHEMA:json_schema` constraint is a placeholder. At evaluation time the
//! item's schema document is expanded into one synthetic constraint per
//! declared field, each already resolved against the parsed response.

mod expand;
mod parse;
mod points;

use thiserror::Error;

pub use expand::expand;
pub use parse::parse_structured;
pub use points::{validation_points, FieldPath, Segment, ValidationPoint, STRUCTURAL_TAG};

/// Errors from reading structured responses.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("{0}")]
    Unparseable(String),
}
