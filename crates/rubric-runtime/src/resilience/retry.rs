//! Constant-delay retries around a capability.
//!
//! Only transient errors ([`ProviderError::is_retryable`]) are retried.

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};

use crate::config::RetryConfig;
use crate::providers::{BatchGenerator, ProviderError};

/// Retries failed calls of the wrapped generator.
pub struct RetryingGenerator<G> {
    inner: G,
    policy: RetryConfig,
}

impl<G: BatchGenerator> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.policy.delay)
            .with_max_times(self.policy.max_attempts.saturating_sub(1))
    }
}

#[async_trait]
impl<G: BatchGenerator> BatchGenerator for RetryingGenerator<G> {
    async fn generate(&self, prompts: Vec<String>) -> Result<Vec<String>, ProviderError> {
        let name = self.inner.name().to_string();
        let inner = &self.inner;

        (|| {
            let prompts = prompts.clone();
            async move { inner.generate(prompts).await }
        })
        .retry(self.backoff())
        .when(ProviderError::is_retryable)
        .notify(move |err: &ProviderError, delay| {
            tracing::warn!(provider = %name, error = %err, retry_in = ?delay, "Capability call failed, retrying");
        })
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
