//! Change detection against the relational source.
//!
//! The source is read-only from this side: the detector issues range queries
//! over `(last_modified, id)` and turns pages of changed rows into documents
//! for the index. The [`ChangeSource`] trait is the driver seam; the shipped
//! implementation speaks SQL through sqlx.

mod detector;
mod error;
mod sql;

pub use detector::{ChangeBatch, ChangeDetector};
pub use error::{SourceError, SourceResult};
pub use sql::SqlSource;

use async_trait::async_trait;

use crate::config::TableConfig;
use crate::state::SyncCheckpoint;

/// One changed row, with the configured columns extracted.
#[derive(Debug, Clone)]
pub struct SourceRow {
    /// Primary key value.
    pub id: i64,
    /// Modification timestamp, unix seconds.
    pub last_modified: i64,
    /// Configured text columns in config order, `None` where NULL.
    pub columns: Vec<(String, Option<String>)>,
}

impl SourceRow {
    /// Value of a named column, if present and non-NULL.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Read-only access to a synced table.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Rows strictly after the checkpoint in `(last_modified, id)` order,
    /// capped at `limit`.
    async fn fetch_changes(
        &self,
        table: &TableConfig,
        after: &SyncCheckpoint,
        limit: usize,
    ) -> SourceResult<Vec<SourceRow>>;

    /// All primary keys currently in the table, for reconciliation.
    async fn list_ids(&self, table: &TableConfig) -> SourceResult<Vec<i64>>;

    /// Cheap connectivity check, used at startup.
    async fn ping(&self) -> SourceResult<()>;
}
