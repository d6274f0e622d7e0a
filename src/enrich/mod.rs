//! Vector enrichment.
//!
//! Attaches embeddings to document batches before indexing. The provider
//! seam keeps the rate-limit, retry, and degraded-mode policy in one place:
//! the local fastembed model and the OpenAI-compatible HTTP endpoint plug in
//! behind the same trait.

mod enricher;
mod error;
mod fastembed;
mod http;

pub use enricher::{EnrichOutcome, Enricher};
pub use error::{EmbedError, EmbedResult};
pub use self::fastembed::FastEmbedProvider;
pub use http::HttpProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;

/// Batch text-to-vector service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One embedding per input text, in input order.
    async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>>;

    /// Vector dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Short provider name for logging.
    fn name(&self) -> &str;
}

/// Build the configured provider.
pub fn provider_from_config(config: &EmbeddingConfig) -> EmbedResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "fastembed" => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| EmbedError::Provider("http provider needs an endpoint".to_string()))?;
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                EmbedError::MissingApiKey {
                    env: config.api_key_env.clone(),
                }
            })?;
            Ok(Arc::new(HttpProvider::new(
                endpoint,
                &api_key,
                &config.model,
                std::time::Duration::from_secs(config.timeout_secs),
                config.dimensions,
            )?))
        }
        other => Err(EmbedError::UnknownProvider(other.to_string())),
    }
}
