//! Core document types shared across the sync pipeline.

use serde::{Deserialize, Serialize};

/// Version tag for documents indexed without a vector (keyword search only).
pub const VERSION_TEXT_ONLY: u64 = 1;

/// Version tag for fully enriched documents (keyword + vector search).
pub const VERSION_ENRICHED: u64 = 2;

/// Derive the stable index identity for a source row.
///
/// The same `(table, row_id)` pair always yields the same id, which is what
/// makes replayed upserts converge instead of duplicating documents.
pub fn document_id(table: &str, row_id: i64) -> String {
    format!("{table}:{row_id}")
}

/// A document on its way into the search index.
///
/// Derived from a source row or an import-file record; never persisted
/// outside the index itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Stable identity, see [`document_id`].
    pub document_id: String,
    /// Source table (or the table name an import record declared).
    pub source_table: String,
    /// Primary key of the originating row.
    pub source_row_id: i64,
    /// Short display line for search results.
    pub title: String,
    /// Concatenated searchable text.
    pub body: String,
    /// Full original record, preserved for retrieval.
    pub payload: serde_json::Value,
    /// Embedding vector, attached by the enricher. `None` until enriched
    /// (or permanently, in degraded mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// [`VERSION_TEXT_ONLY`] or [`VERSION_ENRICHED`].
    pub version: u64,
}

impl IndexedDocument {
    /// Build a text-only document for a source row. The enricher upgrades
    /// `vector` and `version` later.
    pub fn new(
        table: &str,
        row_id: i64,
        title: String,
        body: String,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            document_id: document_id(table, row_id),
            source_table: table.to_string(),
            source_row_id: row_id,
            title,
            body,
            payload,
            vector: None,
            version: VERSION_TEXT_ONLY,
        }
    }

    /// Whether this document still needs an embedding pass.
    pub fn needs_enrichment(&self) -> bool {
        self.version < VERSION_ENRICHED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_deterministic() {
        assert_eq!(document_id("products", 42), "products:42");
        assert_eq!(document_id("products", 42), document_id("products", 42));
        assert_ne!(document_id("products", 42), document_id("warehouse", 42));
    }

    #[test]
    fn test_new_document_is_text_only() {
        let doc = IndexedDocument::new(
            "products",
            7,
            "P007".to_string(),
            "name: widget".to_string(),
            serde_json::json!({"id": 7}),
        );
        assert_eq!(doc.document_id, "products:7");
        assert!(doc.vector.is_none());
        assert!(doc.needs_enrichment());
    }
}
