//! Tantivy-backed document index with idempotent upsert.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tantivy::{
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, Term,
    TantivyDocument as Document,
    collector::{Count, DocSetCollector, TopDocs},
    directory::MmapDirectory,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{
        FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder,
        TextFieldIndexing, TextOptions, Value,
    },
};

use crate::types::{IndexedDocument, VERSION_ENRICHED, VERSION_TEXT_ONLY};

use super::error::{StorageError, StorageResult};

/// Schema fields for the sync index
#[derive(Debug)]
struct IndexSchema {
    document_id: Field,
    table: Field,
    source_row_id: Field,
    title: Field,
    body: Field,
    payload: Field,
    vector: Field,
    version: Field,
}

impl IndexSchema {
    fn build() -> (Schema, IndexSchema) {
        let mut builder = SchemaBuilder::default();

        // Exact-match fields: document identity and table partition
        let document_id = builder.add_text_field("document_id", STRING | STORED);
        let table = builder.add_text_field("table", STRING | STORED);
        let source_row_id = builder.add_i64_field("source_row_id", STORED | FAST);

        // Text fields for search
        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("default")
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let title = builder.add_text_field("title", text_options.clone());
        let body = builder.add_text_field("body", text_options);

        // Retrieval-only fields
        let payload = builder.add_text_field("payload", STORED);
        let vector = builder.add_bytes_field("vector", STORED);

        // Enrichment state, queryable so degraded documents can be found
        let version = builder.add_u64_field("version", INDEXED | STORED | FAST);

        let schema = builder.build();
        let index_schema = IndexSchema {
            document_id,
            table,
            source_row_id,
            title,
            body,
            payload,
            vector,
            version,
        };

        (schema, index_schema)
    }
}

/// Per-document result of a bulk upsert.
#[derive(Debug, Clone)]
pub struct FailedDocument {
    pub document_id: String,
    pub reason: String,
}

/// Outcome of one bulk upsert. A document-level failure never fails the
/// batch; the caller logs and moves past it.
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub indexed: usize,
    pub failed: Vec<FailedDocument>,
}

/// A keyword or vector search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document_id: String,
    pub table: String,
    pub source_row_id: i64,
    pub title: String,
    pub score: f32,
    pub version: u64,
}

/// Search index with upsert-by-id semantics.
///
/// Upsert is delete-then-add inside one writer batch, keyed by
/// `document_id`; replaying a batch converges to the same index state, which
/// is what lets the change feed and the import path deliver the same logical
/// row across a crash/retry boundary.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    schema: IndexSchema,
    index_path: PathBuf,
    /// Created on first write. Read-only users (status, search) never touch
    /// it, so they can open the index while a writer process holds the lock.
    writer: Mutex<Option<IndexWriter<Document>>>,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("index_path", &self.index_path)
            .finish()
    }
}

impl SearchIndex {
    /// Create or open the index at `index_path`.
    pub fn open(index_path: impl AsRef<Path>) -> StorageResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_path)?;

        let (schema, index_schema) = IndexSchema::build();

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)?
        } else {
            let dir = MmapDirectory::open(&index_path)?;
            Index::create(dir, schema, IndexSettings::default())?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            schema: index_schema,
            index_path,
            writer: Mutex::new(None),
        })
    }

    /// Bulk upsert one batch. Each document is deleted by id and re-added,
    /// then the whole batch is committed once; per-document failures are
    /// collected, not escalated.
    pub fn upsert_batch(&self, docs: &[IndexedDocument]) -> StorageResult<UpsertReport> {
        let mut guard = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut writer = match guard.take() {
            Some(writer) => writer,
            None => self.index.writer::<Document>(50_000_000)?,
        };

        let mut report = UpsertReport::default();
        for doc in docs {
            match self.add_upsert(&mut writer, doc) {
                Ok(()) => report.indexed += 1,
                Err(e) => report.failed.push(FailedDocument {
                    document_id: doc.document_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        // A failed commit drops the writer; the next batch starts fresh.
        writer.commit()?;
        *guard = Some(writer);
        drop(guard);

        self.reader.reload()?;
        Ok(report)
    }

    fn add_upsert(
        &self,
        writer: &mut IndexWriter<Document>,
        doc: &IndexedDocument,
    ) -> StorageResult<()> {
        let payload =
            serde_json::to_string(&doc.payload).map_err(|e| StorageError::InvalidFieldValue {
                field: "payload".to_string(),
                reason: e.to_string(),
            })?;

        writer.delete_term(Term::from_field_text(
            self.schema.document_id,
            &doc.document_id,
        ));

        let mut entry = Document::new();
        entry.add_text(self.schema.document_id, &doc.document_id);
        entry.add_text(self.schema.table, &doc.source_table);
        entry.add_i64(self.schema.source_row_id, doc.source_row_id);
        entry.add_text(self.schema.title, &doc.title);
        entry.add_text(self.schema.body, &doc.body);
        entry.add_text(self.schema.payload, &payload);
        if let Some(vector) = &doc.vector {
            entry.add_bytes(self.schema.vector, encode_vector(vector).as_slice());
        }
        entry.add_u64(self.schema.version, doc.version);

        writer.add_document(entry)?;
        Ok(())
    }

    /// Delete documents by id (reconciliation of removed source rows).
    pub fn delete_documents(&self, document_ids: &[String]) -> StorageResult<()> {
        if document_ids.is_empty() {
            return Ok(());
        }
        let mut guard = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut writer = match guard.take() {
            Some(writer) => writer,
            None => self.index.writer::<Document>(50_000_000)?,
        };

        for id in document_ids {
            writer.delete_term(Term::from_field_text(self.schema.document_id, id));
        }

        writer.commit()?;
        *guard = Some(writer);
        drop(guard);

        self.reader.reload()?;
        Ok(())
    }

    /// Total number of indexed documents (the health query).
    pub fn document_count(&self) -> StorageResult<u64> {
        Ok(self.reader.searcher().num_docs())
    }

    /// Documents indexed for one table.
    pub fn table_count(&self, table: &str) -> StorageResult<u64> {
        let query = TermQuery::new(
            Term::from_field_text(self.schema.table, table),
            IndexRecordOption::Basic,
        );
        let count = self.reader.searcher().search(&query, &Count)?;
        Ok(count as u64)
    }

    /// Documents indexed without a vector (degraded mode).
    pub fn degraded_count(&self) -> StorageResult<u64> {
        let query = TermQuery::new(
            Term::from_field_u64(self.schema.version, VERSION_TEXT_ONLY),
            IndexRecordOption::Basic,
        );
        let count = self.reader.searcher().search(&query, &Count)?;
        Ok(count as u64)
    }

    /// Source row ids currently indexed for a table, for reconciliation
    /// against the live source.
    pub fn indexed_row_ids(&self, table: &str) -> StorageResult<Vec<i64>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.schema.table, table),
            IndexRecordOption::Basic,
        );
        let addresses = searcher.search(&query, &DocSetCollector)?;

        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: Document = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.schema.source_row_id).and_then(|v| v.as_i64()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Re-materialize degraded documents for a later enrichment pass.
    pub fn degraded_documents(&self, limit: usize) -> StorageResult<Vec<IndexedDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_u64(self.schema.version, VERSION_TEXT_ONLY),
            IndexRecordOption::Basic,
        );
        let addresses = searcher.search(&query, &DocSetCollector)?;

        let mut docs = Vec::new();
        for address in addresses {
            if docs.len() >= limit {
                break;
            }
            let doc: Document = searcher.doc(address)?;
            docs.push(self.materialize(&doc)?);
        }
        Ok(docs)
    }

    /// Keyword search over title and body, optionally limited to one table.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        table_filter: Option<&str>,
    ) -> StorageResult<Vec<SearchHit>> {
        let searcher = self.reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.schema.title, self.schema.body]);
        let text_query = query_parser
            .parse_query(query_str)
            .map_err(|e| StorageError::QueryParse(e.to_string()))?;

        let query: Box<dyn Query> = match table_filter {
            Some(table) => {
                let table_query = TermQuery::new(
                    Term::from_field_text(self.schema.table, table),
                    IndexRecordOption::Basic,
                );
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, text_query),
                    (Occur::Must, Box::new(table_query)),
                ]))
            }
            None => text_query,
        };

        let top_docs = searcher.search(&*query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: Document = searcher.doc(address)?;
            results.push(self.hit(&doc, score)?);
        }
        Ok(results)
    }

    /// Vector search by cosine similarity. Only enriched documents carry a
    /// vector, so degraded documents stay invisible here until re-enriched
    /// (keyword search still reaches them).
    pub fn search_vector(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<SearchHit>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_u64(self.schema.version, VERSION_ENRICHED),
            IndexRecordOption::Basic,
        );
        let addresses = searcher.search(&query, &DocSetCollector)?;

        let mut scored = Vec::new();
        for address in addresses {
            let doc: Document = searcher.doc(address)?;
            let Some(bytes) = doc.get_first(self.schema.vector).and_then(|v| v.as_bytes()) else {
                continue;
            };
            let vector = decode_vector(bytes);
            let score = cosine_similarity(query_vector, &vector);
            scored.push(self.hit(&doc, score)?);
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Path where the index is stored.
    pub fn path(&self) -> &Path {
        &self.index_path
    }

    fn hit(&self, doc: &Document, score: f32) -> StorageResult<SearchHit> {
        Ok(SearchHit {
            document_id: self.text_field(doc, self.schema.document_id, "document_id")?,
            table: self.text_field(doc, self.schema.table, "table")?,
            source_row_id: doc
                .get_first(self.schema.source_row_id)
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            title: self.text_field(doc, self.schema.title, "title")?,
            score,
            version: doc
                .get_first(self.schema.version)
                .and_then(|v| v.as_u64())
                .unwrap_or(VERSION_TEXT_ONLY),
        })
    }

    fn materialize(&self, doc: &Document) -> StorageResult<IndexedDocument> {
        let payload_json = self.text_field(doc, self.schema.payload, "payload")?;
        let payload =
            serde_json::from_str(&payload_json).map_err(|e| StorageError::InvalidFieldValue {
                field: "payload".to_string(),
                reason: e.to_string(),
            })?;

        Ok(IndexedDocument {
            document_id: self.text_field(doc, self.schema.document_id, "document_id")?,
            source_table: self.text_field(doc, self.schema.table, "table")?,
            source_row_id: doc
                .get_first(self.schema.source_row_id)
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            title: self.text_field(doc, self.schema.title, "title")?,
            body: self.text_field(doc, self.schema.body, "body")?,
            payload,
            vector: doc
                .get_first(self.schema.vector)
                .and_then(|v| v.as_bytes())
                .map(decode_vector),
            version: doc
                .get_first(self.schema.version)
                .and_then(|v| v.as_u64())
                .unwrap_or(VERSION_TEXT_ONLY),
        })
    }

    fn text_field(&self, doc: &Document, field: Field, name: &str) -> StorageResult<String> {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| StorageError::InvalidFieldValue {
                field: name.to_string(),
                reason: "missing stored value".to_string(),
            })
    }
}

/// Little-endian f32 packing for the bytes field.
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
