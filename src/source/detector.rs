//! Poll-based change detection.

use std::sync::Arc;
use std::time::Duration;

use crate::config::TableConfig;
use crate::state::SyncCheckpoint;
use crate::types::IndexedDocument;

use super::error::{SourceError, SourceResult};
use super::{ChangeSource, SourceRow};

/// One page of changes, ready for enrichment and indexing.
///
/// `next_checkpoint` is the position of the page's last row. The caller
/// commits it only after the whole batch is durably in the index; on any
/// failure the same rows are re-fetched next poll and the idempotent upsert
/// absorbs the replay.
#[derive(Debug)]
pub struct ChangeBatch {
    pub table: String,
    pub docs: Vec<IndexedDocument>,
    pub next_checkpoint: SyncCheckpoint,
}

/// Polls a table for rows changed since a checkpoint.
pub struct ChangeDetector {
    source: Arc<dyn ChangeSource>,
    page_size: usize,
    timeout: Duration,
}

impl ChangeDetector {
    pub fn new(source: Arc<dyn ChangeSource>, page_size: usize, timeout: Duration) -> Self {
        Self {
            source,
            page_size,
            timeout,
        }
    }

    /// Fetch the next page of changes after `checkpoint`.
    ///
    /// Returns `None` when nothing changed (checkpoint stays put). A slow
    /// source query is cut off and reported as a retryable timeout.
    pub async fn poll(
        &self,
        table: &TableConfig,
        checkpoint: &SyncCheckpoint,
    ) -> SourceResult<Option<ChangeBatch>> {
        let rows = tokio::time::timeout(
            self.timeout,
            self.source.fetch_changes(table, checkpoint, self.page_size),
        )
        .await
        .map_err(|_| SourceError::Timeout {
            table: table.name.clone(),
            timeout_secs: self.timeout.as_secs(),
        })??;

        let Some(last) = rows.last() else {
            return Ok(None);
        };

        let next_checkpoint = checkpoint.advanced_to(last.last_modified, last.id);
        let docs = rows.iter().map(|row| compose(table, row)).collect();

        Ok(Some(ChangeBatch {
            table: table.name.clone(),
            docs,
            next_checkpoint,
        }))
    }
}

/// Build the index document for a source row.
///
/// Title takes the configured title column (`[id] value`); the body is the
/// labeled concatenation of the text columns; the payload keeps every
/// fetched value for retrieval.
fn compose(table: &TableConfig, row: &SourceRow) -> IndexedDocument {
    let title = match table.title_column().and_then(|col| row.get(col)) {
        Some(value) if !value.is_empty() => format!("[{}] {}", row.id, value),
        _ => format!("[{}] {}", row.id, table.name),
    };

    let body = row
        .columns
        .iter()
        .filter_map(|(col, value)| value.as_ref().map(|v| format!("{col}: {v}")))
        .collect::<Vec<_>>()
        .join("; ");

    let mut payload = serde_json::Map::new();
    payload.insert(table.id_column.clone(), serde_json::json!(row.id));
    payload.insert(
        table.modified_column.clone(),
        serde_json::json!(row.last_modified),
    );
    for (col, value) in &row.columns {
        payload.insert(col.clone(), serde_json::json!(value));
    }

    IndexedDocument::new(
        &table.name,
        row.id,
        title,
        body,
        serde_json::Value::Object(payload),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedSource {
        rows: Vec<SourceRow>,
    }

    #[async_trait]
    impl ChangeSource for FixedSource {
        async fn fetch_changes(
            &self,
            _table: &TableConfig,
            after: &SyncCheckpoint,
            limit: usize,
        ) -> SourceResult<Vec<SourceRow>> {
            // Same predicate the SQL source issues.
            Ok(self
                .rows
                .iter()
                .filter(|r| (r.last_modified, r.id) > after.position())
                .take(limit)
                .cloned()
                .collect())
        }

        async fn list_ids(&self, _table: &TableConfig) -> SourceResult<Vec<i64>> {
            Ok(self.rows.iter().map(|r| r.id).collect())
        }

        async fn ping(&self) -> SourceResult<()> {
            Ok(())
        }
    }

    fn table() -> TableConfig {
        TableConfig {
            name: "products".to_string(),
            id_column: "id".to_string(),
            modified_column: "last_modified".to_string(),
            title_column: Some("name".to_string()),
            text_columns: vec!["name".to_string(), "category".to_string()],
        }
    }

    fn row(id: i64, ts: i64, name: &str) -> SourceRow {
        SourceRow {
            id,
            last_modified: ts,
            columns: vec![
                ("name".to_string(), Some(name.to_string())),
                ("category".to_string(), Some("tools".to_string())),
            ],
        }
    }

    #[tokio::test]
    async fn test_poll_empty_leaves_checkpoint_alone() {
        let detector = ChangeDetector::new(
            Arc::new(FixedSource { rows: vec![] }),
            10,
            Duration::from_secs(5),
        );
        let cp = SyncCheckpoint::origin("products");
        assert!(detector.poll(&table(), &cp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_pages_through_timestamp_ties() {
        // Three changed rows: two share t1, one at t2. With page size 2 the
        // first poll must return exactly the tied pair and advance to
        // (t1, 102); the second poll picks up 103.
        let (t1, t2) = (1000, 2000);
        let source = Arc::new(FixedSource {
            rows: vec![row(101, t1, "alpha"), row(102, t1, "beta"), row(103, t2, "gamma")],
        });
        let detector = ChangeDetector::new(source, 2, Duration::from_secs(5));
        let cp = SyncCheckpoint::origin("products").advanced_to(500, 100);

        let batch = detector.poll(&table(), &cp).await.unwrap().unwrap();
        let ids: Vec<i64> = batch.docs.iter().map(|d| d.source_row_id).collect();
        assert_eq!(ids, vec![101, 102]);
        assert_eq!(batch.next_checkpoint.position(), (t1, 102));

        let batch = detector
            .poll(&table(), &batch.next_checkpoint)
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<i64> = batch.docs.iter().map(|d| d.source_row_id).collect();
        assert_eq!(ids, vec![103]);
        assert_eq!(batch.next_checkpoint.position(), (t2, 103));

        // Fully caught up.
        assert!(
            detector
                .poll(&table(), &batch.next_checkpoint)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_compose_builds_searchable_document() {
        let source = Arc::new(FixedSource {
            rows: vec![row(7, 100, "widget")],
        });
        let detector = ChangeDetector::new(source, 10, Duration::from_secs(5));
        let cp = SyncCheckpoint::origin("products");

        let batch = detector.poll(&table(), &cp).await.unwrap().unwrap();
        let doc = &batch.docs[0];
        assert_eq!(doc.document_id, "products:7");
        assert_eq!(doc.title, "[7] widget");
        assert_eq!(doc.body, "name: widget; category: tools");
        assert_eq!(doc.payload["name"], "widget");
        assert_eq!(doc.payload["last_modified"], 100);
        assert!(doc.needs_enrichment());
    }
}
