//! Resilience patterns for capability calls.
//!
//! - Batch-then-individual fallback with order-preserving concurrency
//! - Constant-delay retry decorator

mod fallback;
mod retry;

pub use fallback::{generate_with_fallback, run_batches};
pub use retry::RetryingGenerator;
