//! Scripted generators for tests and dry runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::providers::{BatchGenerator, ProviderError};

type Responder = Box<dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync>;

/// A [`BatchGenerator`] that answers each prompt with a closure and records
/// every call it receives.
pub struct ScriptedGenerator {
    name: String,
    respond: Responder,
    reject_batches: bool,
    fail_first: usize,
    failure: ProviderError,
    attempts: AtomicUsize,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new(
        name: impl Into<String>,
        respond: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            respond: Box::new(respond),
            reject_batches: false,
            fail_first: 0,
            failure: ProviderError::CallFailed("scripted failure".into()),
            attempts: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with the prompt itself.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, |prompt| Ok(prompt.to_string()))
    }

    /// Reply with the same text to every prompt.
    pub fn constant(name: impl Into<String>, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(name, move |_| Ok(reply.clone()))
    }

    /// Fail every call carrying more than one prompt.
    pub fn rejecting_batches(mut self) -> Self {
        self.reject_batches = true;
        self
    }

    /// Fail the first `n` calls outright.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Fail the first `n` calls with the given error.
    pub fn failing_first_with(mut self, n: usize, error: ProviderError) -> Self {
        self.fail_first = n;
        self.failure = error;
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Total prompts received across all calls.
    pub fn prompt_count(&self) -> usize {
        self.calls.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl BatchGenerator for ScriptedGenerator {
    async fn generate(&self, prompts: Vec<String>) -> Result<Vec<String>, ProviderError> {
        self.calls.lock().push(prompts.clone());

        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            return Err(self.failure.clone());
        }
        if self.reject_batches && prompts.len() > 1 {
            return Err(ProviderError::CallFailed(format!("batch of {} rejected", prompts.len())));
        }

        prompts.iter().map(|p| (self.respond)(p)).collect()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
