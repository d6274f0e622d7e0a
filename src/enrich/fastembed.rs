//! Local embedding provider backed by fastembed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::error::{EmbedError, EmbedResult};
use super::EmbeddingProvider;

/// In-process embedding model.
///
/// The model is CPU work behind a mutex; calls run on the blocking pool so
/// embedding a large sub-batch never stalls the async workers.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimensions: usize,
    model_name: String,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> EmbedResult<Self> {
        let model = parse_model(model_name)?;
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| EmbedError::ModelInit(e.to_string()))?;

        // Probe dimensions with a test embedding.
        let probe = text_model
            .embed(vec!["test"], None)
            .map_err(|e| EmbedError::ModelInit(e.to_string()))?;
        let dimensions = probe
            .into_iter()
            .next()
            .map(|v| v.len())
            .ok_or_else(|| EmbedError::ModelInit("model produced no embedding".to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_model)),
            dimensions,
            model_name: model_name.to_string(),
        })
    }
}

fn parse_model(name: &str) -> EmbedResult<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(EmbedError::ModelInit(format!(
            "unsupported fastembed model: {other}"
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Provider("model lock poisoned".to_string()))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbedError::Provider(e.to_string()))
        })
        .await
        .map_err(|e| EmbedError::Provider(e.to_string()))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_rejects_unknown() {
        assert!(parse_model("AllMiniLML6V2").is_ok());
        assert!(parse_model("not-a-model").is_err());
    }

    #[tokio::test]
    #[ignore = "Downloads 86MB model - run with --ignored"]
    async fn test_embed_produces_vectors() {
        let provider = FastEmbedProvider::new("AllMiniLML6V2").unwrap();
        assert_eq!(provider.dimensions(), 384);

        let vectors = provider
            .embed(&["warehouse stock level".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 384);
    }
}
