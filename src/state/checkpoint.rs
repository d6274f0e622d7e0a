//! Per-table sync cursor.

use serde::{Deserialize, Serialize};

/// Durable cursor marking the last synchronized position in a source table.
///
/// Ordered by `(last_seen_timestamp, last_seen_id)`. The id tie-break matters:
/// modification timestamps have second granularity, so several rows can share
/// one, and a timestamp-only cursor would skip the later rows of a tied page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub table_name: String,
    pub last_seen_timestamp: i64,
    pub last_seen_id: i64,
}

impl SyncCheckpoint {
    /// Checkpoint before any row: the first poll pages through the whole
    /// table (full initial sync).
    pub fn origin(table: &str) -> Self {
        Self {
            table_name: table.to_string(),
            last_seen_timestamp: 0,
            last_seen_id: 0,
        }
    }

    /// Composite position for ordering comparisons.
    pub fn position(&self) -> (i64, i64) {
        (self.last_seen_timestamp, self.last_seen_id)
    }

    /// Whether a row at `(timestamp, id)` is already covered by this cursor.
    pub fn covers(&self, timestamp: i64, id: i64) -> bool {
        (timestamp, id) <= self.position()
    }

    /// A copy advanced to `(timestamp, id)`.
    pub fn advanced_to(&self, timestamp: i64, id: i64) -> Self {
        Self {
            table_name: self.table_name.clone(),
            last_seen_timestamp: timestamp,
            last_seen_id: id,
        }
    }
}
