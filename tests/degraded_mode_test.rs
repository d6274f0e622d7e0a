//! Degraded-mode policy: a dead embedding service must not block textual
//! indexing, and degraded documents are re-enriched once the service is
//! back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use indexsync::config::EmbeddingConfig;
use indexsync::enrich::{EmbedError, EmbedResult, EmbeddingProvider, Enricher};
use indexsync::index::SearchIndex;
use indexsync::types::IndexedDocument;

struct DeadProvider {
    calls: AtomicU32,
}

#[async_trait]
impl EmbeddingProvider for DeadProvider {
    async fn embed(&self, _texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmbedError::Provider("connection refused".to_string()))
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "dead"
    }
}

struct LiveProvider;

#[async_trait]
impl EmbeddingProvider for LiveProvider {
    async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0, 1.0, 0.0]).collect())
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "live"
    }
}

fn config() -> EmbeddingConfig {
    EmbeddingConfig {
        batch_size: 10,
        max_retries: 1,
        rate_limit_ms: 1,
        ..EmbeddingConfig::default()
    }
}

fn docs() -> Vec<IndexedDocument> {
    (1..=3)
        .map(|i| {
            IndexedDocument::new(
                "complaints",
                i,
                format!("[{i}] delayed delivery"),
                format!("description: order {i} arrived late"),
                serde_json::json!({"id": i}),
            )
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_embedding_outage_degrades_but_still_indexes() {
    let temp = TempDir::new().unwrap();
    let index = SearchIndex::open(temp.path().join("index")).unwrap();

    let dead = Arc::new(DeadProvider {
        calls: AtomicU32::new(0),
    });
    let enricher = Enricher::new(
        Arc::clone(&dead) as Arc<dyn EmbeddingProvider>,
        &config(),
    );

    let mut batch = docs();
    let outcome = enricher.enrich(&mut batch).await;
    assert_eq!(outcome.degraded, 3);
    assert_eq!(outcome.enriched, 0);
    // max_retries = 1 means one initial call plus one retry.
    assert_eq!(dead.calls.load(Ordering::SeqCst), 2);

    // The batch still lands in the index, text only.
    let report = index.upsert_batch(&batch).unwrap();
    assert_eq!(report.indexed, 3);
    assert_eq!(index.degraded_count().unwrap(), 3);

    // Keyword search over the degraded documents succeeds...
    assert_eq!(index.search("delivery", 10, None).unwrap().len(), 3);
    // ...vector search does not surface them yet.
    assert!(index.search_vector(&[0.0, 1.0, 0.0], 10).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_degraded_documents_are_re_enriched_later() {
    let temp = TempDir::new().unwrap();
    let index = SearchIndex::open(temp.path().join("index")).unwrap();

    // Index the batch degraded.
    let batch = docs();
    index.upsert_batch(&batch).unwrap();
    assert_eq!(index.degraded_count().unwrap(), 3);

    // Service recovers; a re-enrichment pass picks the flagged documents
    // back up.
    let enricher = Enricher::new(Arc::new(LiveProvider), &config());
    let mut pending = index.degraded_documents(100).unwrap();
    assert_eq!(pending.len(), 3);

    let outcome = enricher.enrich(&mut pending).await;
    assert_eq!(outcome.enriched, 3);
    index.upsert_batch(&pending).unwrap();

    // No duplicates, nothing degraded, and vector search now works.
    assert_eq!(index.document_count().unwrap(), 3);
    assert_eq!(index.degraded_count().unwrap(), 0);
    assert_eq!(index.search_vector(&[0.0, 1.0, 0.0], 10).unwrap().len(), 3);
    // Keyword search is unaffected by the upgrade.
    assert_eq!(index.search("delivery", 10, None).unwrap().len(), 3);
}
