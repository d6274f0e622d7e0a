//! Aggregated status for external observability.
//!
//! Operators see failures exclusively here and in the `.error/` directory:
//! an unresolved failure always leaves a visible artifact, either a stale
//! checkpoint or an error file with its last error.

use serde::Serialize;

use crate::config::Settings;
use crate::index::SearchIndex;
use crate::state::{FsStateStore, JobState, QueueCounts, SyncCheckpoint};

use super::error::SyncResult;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub tables: Vec<TableStatus>,
    pub queue: QueueStatus,
    pub total_documents: u64,
    pub degraded_documents: u64,
}

#[derive(Debug, Serialize)]
pub struct TableStatus {
    pub table: String,
    pub checkpoint: Option<SyncCheckpoint>,
    pub indexed_documents: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub counts: QueueCounts,
    pub errors: Vec<ErrorFile>,
}

#[derive(Debug, Serialize)]
pub struct ErrorFile {
    pub file: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Collect the full status report.
pub fn collect(
    settings: &Settings,
    store: &FsStateStore,
    index: &SearchIndex,
) -> SyncResult<StatusReport> {
    let mut tables = Vec::with_capacity(settings.tables.len());
    for table in &settings.tables {
        tables.push(TableStatus {
            table: table.name.clone(),
            checkpoint: store.load_checkpoint(&table.name)?,
            indexed_documents: index.table_count(&table.name)?,
        });
    }

    let errors = store
        .list_jobs(JobState::Error)?
        .into_iter()
        .map(|job| ErrorFile {
            file: job.file_name,
            attempts: job.attempts,
            last_error: job.last_error,
        })
        .collect();

    Ok(StatusReport {
        tables,
        queue: QueueStatus {
            counts: store.queue_counts()?,
            errors,
        },
        total_documents: index.document_count()?,
        degraded_documents: index.degraded_count()?,
    })
}
