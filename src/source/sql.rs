//! sqlx-backed change source.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::TableConfig;
use crate::state::SyncCheckpoint;

use super::error::{SourceError, SourceResult};
use super::{ChangeSource, SourceRow};

/// SQL change source over a sqlx pool.
///
/// The keyset predicate compares the composite `(last_modified, id)` key, not
/// the timestamp alone: several rows can share a second-granularity
/// timestamp, and a timestamp-only cursor silently skips the tied rows that
/// fall past a page boundary.
pub struct SqlSource {
    pool: SqlitePool,
}

impl SqlSource {
    /// Connect read-only to the source database.
    pub async fn connect(url: &str) -> SourceResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SourceError::Unreachable(format!("{url}: {e}")))?
            .create_if_missing(false)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| SourceError::Unreachable(format!("{url}: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, embedding in another process).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeSource for SqlSource {
    async fn fetch_changes(
        &self,
        table: &TableConfig,
        after: &SyncCheckpoint,
        limit: usize,
    ) -> SourceResult<Vec<SourceRow>> {
        // Identifiers come from validated config (Settings::validate), so
        // interpolation here cannot introduce arbitrary SQL.
        let id = &table.id_column;
        let modified = &table.modified_column;
        let columns = table.text_columns.join(", ");
        let sql = format!(
            "SELECT {id}, {modified}, {columns} FROM {table} \
             WHERE {modified} > ? OR ({modified} = ? AND {id} > ?) \
             ORDER BY {modified} ASC, {id} ASC LIMIT ?",
            table = table.name,
        );

        let rows = sqlx::query(&sql)
            .bind(after.last_seen_timestamp)
            .bind(after.last_seen_timestamp)
            .bind(after.last_seen_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row_id: i64 = row.try_get(id.as_str())?;
            let last_modified: i64 = row.try_get(modified.as_str())?;
            let mut columns = Vec::with_capacity(table.text_columns.len());
            for col in &table.text_columns {
                let value: Option<String> = row.try_get(col.as_str())?;
                columns.push((col.clone(), value));
            }
            out.push(SourceRow {
                id: row_id,
                last_modified,
                columns,
            });
        }
        Ok(out)
    }

    async fn list_ids(&self, table: &TableConfig) -> SourceResult<Vec<i64>> {
        let sql = format!(
            "SELECT {id} FROM {table} ORDER BY {id} ASC",
            id = table.id_column,
            table = table.name,
        );
        let ids = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(ids)
    }

    async fn ping(&self) -> SourceResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
