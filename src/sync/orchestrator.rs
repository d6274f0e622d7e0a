//! Top-level scheduling and shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::{Settings, TableConfig};
use crate::enrich::{EnrichOutcome, Enricher, provider_from_config};
use crate::import::ImportQueueWatcher;
use crate::index::SearchIndex;
use crate::log_event;
use crate::source::{ChangeDetector, ChangeSource, SqlSource};
use crate::state::{FsStateStore, SyncCheckpoint};
use crate::types::document_id;

use super::error::{SyncError, SyncResult};
use super::pipeline::{self, WorkOrigin};
use super::status::{self, StatusReport};

/// Result of one reconciliation pass over a table.
#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    pub checked: usize,
    pub removed: usize,
}

/// Owns the schedules: per-table pollers, the import sweep, and the worker
/// pool, all fed through one bounded queue and stopped by one cancellation
/// token.
pub struct Orchestrator {
    settings: Arc<Settings>,
    store: Arc<FsStateStore>,
    source: Arc<dyn ChangeSource>,
    index: Arc<SearchIndex>,
    enricher: Option<Arc<Enricher>>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<FsStateStore>,
        source: Arc<dyn ChangeSource>,
        index: Arc<SearchIndex>,
        enricher: Option<Arc<Enricher>>,
    ) -> Self {
        Self {
            settings,
            store,
            source,
            index,
            enricher,
        }
    }

    /// Wire up the full service from settings.
    ///
    /// Validation and connectivity failures here abort startup before any
    /// state is mutated.
    pub async fn build(settings: Settings) -> SyncResult<Self> {
        settings.validate().map_err(SyncError::Config)?;

        let store = Arc::new(FsStateStore::open(
            &settings.state_path,
            &settings.import.queue_dir,
            settings.import.max_attempts,
        )?);

        let source = Arc::new(SqlSource::connect(&settings.source.url).await?);
        source.ping().await?;

        let index = Arc::new(SearchIndex::open(&settings.index_path)?);

        let enricher = if settings.embedding.enabled {
            let provider = provider_from_config(&settings.embedding)?;
            log_event!("sync", "embedding provider", "{}", provider.name());
            Some(Arc::new(Enricher::new(provider, &settings.embedding)))
        } else {
            None
        };

        Ok(Self::new(
            Arc::new(settings),
            store,
            source,
            index,
            enricher,
        ))
    }

    pub fn store(&self) -> &Arc<FsStateStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    /// Run until the token is cancelled, then drain.
    ///
    /// On shutdown the pollers and the import sweep stop producing, workers
    /// finish the batches already queued (bounded by the drain timeout), and
    /// since checkpoints and job states only advance on acked batches there
    /// is nothing further to persist.
    pub async fn run(&self, cancel: CancellationToken) -> SyncResult<()> {
        let sync = &self.settings.sync;
        let (tx, rx) = mpsc::channel(sync.workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(sync.workers);
        for id in 0..sync.workers {
            workers.push(tokio::spawn(pipeline::run_worker(
                id,
                Arc::clone(&rx),
                self.enricher.clone(),
                Arc::clone(&self.index),
                sync.index_batch_size,
            )));
        }

        let mut producers: Vec<JoinHandle<()>> = Vec::new();

        let detector = Arc::new(ChangeDetector::new(
            Arc::clone(&self.source),
            sync.page_size,
            Duration::from_secs(self.settings.source.timeout_secs),
        ));
        for table in self.settings.tables.clone() {
            producers.push(tokio::spawn(poll_table(
                table,
                Arc::clone(&detector),
                Arc::clone(&self.store),
                tx.clone(),
                Duration::from_secs(sync.poll_interval_secs),
                cancel.clone(),
            )));
        }

        let watcher = ImportQueueWatcher::new(
            Arc::clone(&self.store),
            tx.clone(),
            &self.settings.import,
            cancel.clone(),
        );
        producers.push(tokio::spawn(watcher.run()));

        // Workers observe queue close once every producer sender is gone.
        drop(tx);

        log_event!(
            "sync",
            "started",
            "{} tables, {} workers",
            self.settings.tables.len(),
            sync.workers
        );

        for handle in producers {
            let _ = handle.await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(sync.drain_timeout_secs);
        for handle in workers {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("[sync] drain timeout: abandoning an in-flight batch");
            }
        }

        log_event!("sync", "stopped");
        Ok(())
    }

    /// Current checkpoints, queue depths, and index counts.
    pub fn status(&self) -> SyncResult<StatusReport> {
        status::collect(&self.settings, &self.store, &self.index)
    }

    /// Deletion propagation: diff each table's live ids against the index
    /// and delete documents whose source row is gone. The change feed
    /// carries no tombstones, so this full pass is the only way deletions
    /// reach the index; it runs on operator demand, never on a schedule.
    pub async fn reconcile(&self) -> SyncResult<Vec<ReconcileReport>> {
        let mut reports = Vec::with_capacity(self.settings.tables.len());
        for table in &self.settings.tables {
            reports.push(self.reconcile_table(table).await?);
        }
        Ok(reports)
    }

    async fn reconcile_table(&self, table: &TableConfig) -> SyncResult<ReconcileReport> {
        let live: HashSet<i64> = self.source.list_ids(table).await?.into_iter().collect();
        let indexed = self.index.indexed_row_ids(&table.name)?;

        let orphans: Vec<String> = indexed
            .iter()
            .filter(|id| !live.contains(id))
            .map(|id| document_id(&table.name, *id))
            .collect();

        self.index.delete_documents(&orphans)?;

        if !orphans.is_empty() {
            log_event!(
                "sync",
                "reconciled",
                "{}: removed {} deleted rows",
                table.name,
                orphans.len()
            );
        }

        Ok(ReconcileReport {
            table: table.name.clone(),
            checked: indexed.len(),
            removed: orphans.len(),
        })
    }

    /// Re-enrich documents that were indexed in degraded mode.
    pub async fn re_enrich(&self, limit: usize) -> SyncResult<EnrichOutcome> {
        let Some(enricher) = &self.enricher else {
            return Ok(EnrichOutcome::default());
        };

        let mut docs = self.index.degraded_documents(limit)?;
        if docs.is_empty() {
            return Ok(EnrichOutcome::default());
        }

        let outcome = enricher.enrich(&mut docs).await;
        let enriched: Vec<_> = docs
            .into_iter()
            .filter(|doc| !doc.needs_enrichment())
            .collect();
        if !enriched.is_empty() {
            self.index.upsert_batch(&enriched)?;
            log_event!("sync", "re-enriched", "{} documents", enriched.len());
        }

        Ok(outcome)
    }
}

/// Per-table poll loop. Escalation stops here: one table's failure is
/// logged and retried next interval while the other workers continue.
async fn poll_table(
    table: TableConfig,
    detector: Arc<ChangeDetector>,
    store: Arc<FsStateStore>,
    queue: mpsc::Sender<pipeline::WorkItem>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        match poll_once(&table, &detector, &store, &queue, &cancel).await {
            Ok(0) => {}
            Ok(rows) => log_event!("detector", "synced", "{}: {rows} rows", table.name),
            Err(e) => tracing::warn!("[detector] {} poll failed: {e}", table.name),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
}

/// Drain every page currently behind the checkpoint.
///
/// The checkpoint only commits after the batch is acked as durably indexed.
/// If anything fails mid-batch the checkpoint stays put and the next poll
/// re-fetches the same rows; upsert-by-id absorbs the replay.
async fn poll_once(
    table: &TableConfig,
    detector: &ChangeDetector,
    store: &FsStateStore,
    queue: &mpsc::Sender<pipeline::WorkItem>,
    cancel: &CancellationToken,
) -> SyncResult<usize> {
    let mut checkpoint = store
        .load_checkpoint(&table.name)?
        .unwrap_or_else(|| SyncCheckpoint::origin(&table.name));
    let mut total = 0;

    while !cancel.is_cancelled() {
        let Some(batch) = detector.poll(table, &checkpoint).await? else {
            break;
        };
        let docs = batch.docs;
        let next_checkpoint = batch.next_checkpoint;
        let fetched = docs.len();

        let report = pipeline::submit(queue, WorkOrigin::Table(table.name.clone()), docs).await?;
        for failed in &report.failed {
            tracing::warn!(
                "[detector] document {} skipped: {}",
                failed.document_id,
                failed.reason
            );
        }

        store.commit_checkpoint(&next_checkpoint)?;
        checkpoint = next_checkpoint;
        total += fetched;
    }

    Ok(total)
}
