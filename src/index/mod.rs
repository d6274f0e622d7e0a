//! Search index storage.
//!
//! Tantivy-backed full-text index with idempotent upsert-by-id, the
//! document-count/health surface, and the vector side of hybrid search.

mod error;
mod writer;

pub use error::{StorageError, StorageResult};
pub use writer::{FailedDocument, SearchHit, SearchIndex, UpsertReport};
