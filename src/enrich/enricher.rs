//! Rate-limited batch enrichment with a degraded-mode fallback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::EmbeddingConfig;
use crate::debug_event;
use crate::types::{IndexedDocument, VERSION_ENRICHED};

use super::error::{EmbedError, EmbedResult};
use super::EmbeddingProvider;

/// What an enrichment pass did to a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOutcome {
    /// Documents that now carry a vector.
    pub enriched: usize,
    /// Documents passed through without one after retries were exhausted.
    pub degraded: usize,
}

/// Attaches vectors to document batches.
///
/// Sub-batches are capped at the configured size and separated by a minimum
/// delay to stay under the provider's quota. A failing sub-batch is retried
/// with exponential backoff up to a bound; past the bound its documents go
/// on without vectors so textual search is never blocked by embedding
/// unavailability. Degraded documents keep their text-only version tag and
/// are picked up by a later re-enrichment pass.
pub struct Enricher {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    rate_limit: Duration,
    max_retries: u32,
    timeout: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Enricher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            rate_limit: Duration::from_millis(config.rate_limit_ms),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            last_call: Mutex::new(None),
        }
    }

    /// Attach vectors to every document in the batch that still needs one.
    ///
    /// Never fails the batch: embedding trouble degrades the affected
    /// sub-batch and the rest proceeds.
    pub async fn enrich(&self, docs: &mut [IndexedDocument]) -> EnrichOutcome {
        let targets: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| doc.needs_enrichment())
            .map(|(i, _)| i)
            .collect();

        let mut outcome = EnrichOutcome::default();

        for chunk in targets.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|&i| embedding_text(&docs[i])).collect();

            match self.embed_with_retry(&texts).await {
                Ok(vectors) => {
                    for (&i, vector) in chunk.iter().zip(vectors) {
                        docs[i].vector = Some(vector);
                        docs[i].version = VERSION_ENRICHED;
                    }
                    outcome.enriched += chunk.len();
                }
                Err(e) => {
                    tracing::warn!(
                        "[enrich] sub-batch of {} degraded after {} retries: {e}",
                        chunk.len(),
                        self.max_retries
                    );
                    outcome.degraded += chunk.len();
                }
            }
        }

        outcome
    }

    async fn embed_with_retry(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;
        loop {
            self.throttle().await;

            let error = match tokio::time::timeout(self.timeout, self.provider.embed(texts)).await
            {
                Ok(Ok(vectors)) => {
                    if vectors.len() == texts.len() {
                        return Ok(vectors);
                    }
                    EmbedError::BatchMismatch {
                        expected: texts.len(),
                        got: vectors.len(),
                    }
                }
                Ok(Err(e)) => e,
                Err(_) => EmbedError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                },
            };

            attempt += 1;
            if attempt > self.max_retries {
                return Err(error);
            }

            let backoff = backoff_delay(attempt);
            debug_event!(
                "enrich",
                "retry",
                "attempt {attempt}/{} in {}ms: {error}",
                self.max_retries,
                backoff.as_millis()
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Enforce the minimum spacing between provider calls.
    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit {
                tokio::time::sleep(self.rate_limit - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Text handed to the provider: title plus body, the same composition the
/// original documents were built from.
fn embedding_text(doc: &IndexedDocument) -> String {
    if doc.body.is_empty() {
        doc.title.clone()
    } else {
        format!("{}\n{}", doc.title, doc.body)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let capped = attempt.min(5);
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VERSION_TEXT_ONLY;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that fails the first `failures` calls, then succeeds.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EmbedError::Provider("rate limited".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn config(batch_size: usize, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            max_retries,
            rate_limit_ms: 10,
            ..EmbeddingConfig::default()
        }
    }

    fn docs(n: usize) -> Vec<IndexedDocument> {
        (0..n)
            .map(|i| {
                IndexedDocument::new(
                    "products",
                    i as i64,
                    format!("[{i}] item"),
                    format!("name: item {i}"),
                    serde_json::json!({}),
                )
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_attaches_vectors() {
        let provider = Arc::new(FlakyProvider {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let enricher = Enricher::new(provider, &config(10, 3));

        let mut batch = docs(3);
        let outcome = enricher.enrich(&mut batch).await;

        assert_eq!(outcome, EnrichOutcome { enriched: 3, degraded: 0 });
        for doc in &batch {
            assert_eq!(doc.vector.as_deref(), Some(&[1.0, 0.0][..]));
            assert_eq!(doc.version, VERSION_ENRICHED);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_retries_then_succeeds() {
        let provider = Arc::new(FlakyProvider {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let enricher = Enricher::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, &config(10, 3));

        let mut batch = docs(2);
        let outcome = enricher.enrich(&mut batch).await;

        assert_eq!(outcome.enriched, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_degrades_after_retry_bound() {
        let provider = Arc::new(FlakyProvider {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let enricher = Enricher::new(provider, &config(2, 1));

        let mut batch = docs(3);
        let outcome = enricher.enrich(&mut batch).await;

        // Two sub-batches (2 + 1), both degraded.
        assert_eq!(outcome, EnrichOutcome { enriched: 0, degraded: 3 });
        for doc in &batch {
            assert!(doc.vector.is_none());
            assert_eq!(doc.version, VERSION_TEXT_ONLY);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_skips_already_enriched() {
        let provider = Arc::new(FlakyProvider {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let enricher = Enricher::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, &config(10, 0));

        let mut batch = docs(2);
        batch[0].vector = Some(vec![9.0, 9.0]);
        batch[0].version = VERSION_ENRICHED;

        let outcome = enricher.enrich(&mut batch).await;
        assert_eq!(outcome.enriched, 1);
        // The pre-enriched vector is untouched.
        assert_eq!(batch[0].vector.as_deref(), Some(&[9.0, 9.0][..]));
    }
}
