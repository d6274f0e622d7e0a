//! Shared work queue between the producers (change detector, import
//! watcher) and the enrich/index worker pool.
//!
//! Producers submit a batch and await its acknowledgement; the ack only
//! arrives after the batch is committed to the index, so a producer can
//! safely advance its checkpoint or job state on success.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::debug_event;
use crate::enrich::Enricher;
use crate::index::{SearchIndex, StorageError, UpsertReport};
use crate::types::IndexedDocument;

use super::error::{SyncError, SyncResult};

/// Where a batch came from, for logging and error routing.
#[derive(Debug, Clone)]
pub enum WorkOrigin {
    Table(String),
    File(String),
}

impl std::fmt::Display for WorkOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkOrigin::Table(name) => write!(f, "table {name}"),
            WorkOrigin::File(name) => write!(f, "file {name}"),
        }
    }
}

/// One batch of documents plus the channel its outcome is reported on.
pub struct WorkItem {
    pub origin: WorkOrigin,
    pub docs: Vec<IndexedDocument>,
    pub reply: oneshot::Sender<SyncResult<UpsertReport>>,
}

/// Submit a batch and wait until it has been enriched and committed.
pub async fn submit(
    queue: &mpsc::Sender<WorkItem>,
    origin: WorkOrigin,
    docs: Vec<IndexedDocument>,
) -> SyncResult<UpsertReport> {
    let (reply, response) = oneshot::channel();
    queue
        .send(WorkItem {
            origin,
            docs,
            reply,
        })
        .await
        .map_err(|_| SyncError::QueueClosed)?;
    response.await.map_err(|_| SyncError::QueueClosed)?
}

/// Worker loop: take a batch, attach vectors, write it to the index, ack.
///
/// Workers share one receiver behind a mutex; the lock is only held while
/// dequeueing, so batches still process in parallel. The loop ends when
/// every producer has dropped its sender.
pub async fn run_worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    enricher: Option<Arc<Enricher>>,
    index: Arc<SearchIndex>,
    index_batch_size: usize,
) {
    loop {
        let item = queue.lock().await.recv().await;
        let Some(mut item) = item else {
            break;
        };

        debug_event!("worker", "batch", "#{id} {} ({} docs)", item.origin, item.docs.len());

        if let Some(enricher) = &enricher {
            let outcome = enricher.enrich(&mut item.docs).await;
            if outcome.degraded > 0 {
                tracing::warn!(
                    "[worker] {}: {} documents indexed without vectors",
                    item.origin,
                    outcome.degraded
                );
            }
        }

        let result = upsert_all(&index, &item.docs, index_batch_size);
        // Producer may have shut down; a dropped reply is harmless because
        // the checkpoint it guarded was simply not advanced.
        let _ = item.reply.send(result.map_err(SyncError::from));
    }

    debug_event!("worker", "stopped", "#{id}");
}

/// Upsert in index-write sized chunks, merging the per-document outcomes.
fn upsert_all(
    index: &SearchIndex,
    docs: &[IndexedDocument],
    batch_size: usize,
) -> Result<UpsertReport, StorageError> {
    let mut total = UpsertReport::default();
    for chunk in docs.chunks(batch_size.max(1)) {
        let report = index.upsert_batch(chunk)?;
        total.indexed += report.indexed;
        total.failed.extend(report.failed);
    }
    Ok(total)
}
