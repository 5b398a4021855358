//! Batch-then-individual fallback for capability calls.

use futures::stream::{self, StreamExt};

use crate::providers::{BatchGenerator, ProviderError};

/// Send prompts as one batch; on failure or misalignment resend each prompt
/// on its own.
///
/// Always returns one result per prompt, in prompt order. An individual
/// failure affects only its own slot.
pub async fn generate_with_fallback(
    generator: &dyn BatchGenerator,
    prompts: Vec<String>,
) -> Vec<Result<String, ProviderError>> {
    let expected = prompts.len();
    if expected == 0 {
        return Vec::new();
    }

    let batch_error = match generator.generate(prompts.clone()).await {
        Ok(outputs) if outputs.len() == expected => return outputs.into_iter().map(Ok).collect(),
        Ok(outputs) => ProviderError::Misaligned { expected, actual: outputs.len() },
        Err(e) => e,
    };

    if expected == 1 {
        return vec![Err(batch_error)];
    }

    tracing::warn!(
        provider = generator.name(),
        batch = expected,
        error = %batch_error,
        "Batch call failed, falling back to individual calls"
    );

    let mut results = Vec::with_capacity(expected);
    for prompt in prompts {
        let result = match generator.generate(vec![prompt]).await {
            Ok(mut outputs) if outputs.len() == 1 => Ok(outputs.remove(0)),
            Ok(outputs) => Err(ProviderError::Misaligned { expected: 1, actual: outputs.len() }),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(provider = generator.name(), error = %e, "Individual call failed");
        }
        results.push(result);
    }
    results
}

/// Chunk prompts into batches and run up to `concurrency` batches at once.
///
/// Results stay aligned with the input order.
pub async fn run_batches(
    generator: &dyn BatchGenerator,
    prompts: Vec<String>,
    batch_size: usize,
    concurrency: usize,
) -> Vec<Result<String, ProviderError>> {
    let chunks: Vec<Vec<String>> = prompts.chunks(batch_size.max(1)).map(<[String]>::to_vec).collect();
    tracing::debug!(
        provider = generator.name(),
        prompts = prompts.len(),
        batches = chunks.len(),
        "Dispatching batches"
    );

    stream::iter(chunks)
        .map(|chunk| generate_with_fallback(generator, chunk))
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    fn prompts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    #[tokio::test]
    async fn test_successful_batch_is_single_call() {
        let generator = ScriptedGenerator::echo("echo");
        let results = generate_with_fallback(&generator, prompts(3)).await;

        assert_eq!(generator.calls().len(), 1);
        let texts: Vec<String> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["p0", "p1", "p2"]);
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_individual_calls() {
        let generator = ScriptedGenerator::echo("echo").rejecting_batches();
        let results = generate_with_fallback(&generator, prompts(3)).await;

        // One rejected batch plus three single-prompt calls
        assert_eq!(generator.calls().len(), 4);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(results[2].as_deref().unwrap(), "p2");
    }

    #[tokio::test]
    async fn test_individual_failure_is_isolated() {
        let generator = ScriptedGenerator::new("picky", |p| {
            if p == "p1" {
                Err(ProviderError::CallFailed("no".into()))
            } else {
                Ok(p.to_uppercase())
            }
        });
        let results = generate_with_fallback(&generator, prompts(3)).await;

        assert_eq!(results[0].as_deref().unwrap(), "P0");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_deref().unwrap(), "P2");
    }

    #[tokio::test]
    async fn test_single_prompt_failure_not_repeated() {
        let generator = ScriptedGenerator::echo("echo").failing_first(1);
        let results = generate_with_fallback(&generator, prompts(1)).await;
        assert!(results[0].is_err());
        assert_eq!(generator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_run_batches_chunks_and_preserves_order() {
        let generator = ScriptedGenerator::echo("echo");
        let results = run_batches(&generator, prompts(5), 2, 3).await;

        let sizes: Vec<usize> = generator.calls().iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        assert_eq!(sizes.len(), 3);

        let texts: Vec<String> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, prompts(5));
    }
}
