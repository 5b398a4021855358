//! Batch generation capability.
//!
//! The subject system, the extraction model and the judge are all reached
//! through [`BatchGenerator`]: a list of prompts in, an order-aligned list of
//! texts out. Wire protocols live outside this crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from batch generation capabilities.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider call failed: {0}")]
    CallFailed(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Misaligned output: expected {expected} texts, got {actual}")]
    Misaligned { expected: usize, actual: usize },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether another attempt could succeed. Misaligned output and missing
    /// configuration are returned at once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CallFailed(_) | Self::RateLimited { .. } | Self::Timeout(_))
    }
}

/// Order-aligned batch text generation.
///
/// Implementations must return exactly one text per prompt, in prompt order,
/// or an error for the whole call.
#[async_trait]
pub trait BatchGenerator: Send + Sync {
    /// Generate one text per prompt.
    async fn generate(&self, prompts: Vec<String>) -> Result<Vec<String>, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: BatchGenerator + ?Sized> BatchGenerator for Arc<T> {
    async fn generate(&self, prompts: Vec<String>) -> Result<Vec<String>, ProviderError> {
        (**self).generate(prompts).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The three capabilities an evaluation run talks to.
#[derive(Clone)]
pub struct Capabilities {
    /// System under test
    pub subject: Arc<dyn BatchGenerator>,
    /// Extraction model for model-guided and programmatic directives
    pub extractor: Arc<dyn BatchGenerator>,
    /// Semantic judge
    pub judge: Arc<dyn BatchGenerator>,
}

impl Capabilities {
    pub fn new(
        subject: Arc<dyn BatchGenerator>,
        extractor: Arc<dyn BatchGenerator>,
        judge: Arc<dyn BatchGenerator>,
    ) -> Self {
        Self { subject, extractor, judge }
    }

    /// Use one model as both extractor and judge.
    pub fn with_grader(subject: Arc<dyn BatchGenerator>, grader: Arc<dyn BatchGenerator>) -> Self {
        Self { subject, extractor: grader.clone(), judge: grader }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("subject", &self.subject.name())
            .field("extractor", &self.extractor.name())
            .field("judge", &self.judge.name())
            .finish()
    }
}
