//! Incoming-directory sweep loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::ImportConfig;
use crate::log_event;
use crate::state::{FsStateStore, ImportJob, JobOutcome, JobState, StateError};
use crate::sync::pipeline::{WorkItem, WorkOrigin, submit};

use super::error::ImportResult;
use super::parser::parse_jsonl;

/// Drives queued files through the import state machine.
///
/// Each sweep lists pending files and claims them one at a time; a lost
/// claim race means another worker owns the file, and this watcher performs
/// no further side effects on it.
pub struct ImportQueueWatcher {
    store: Arc<FsStateStore>,
    queue: mpsc::Sender<WorkItem>,
    sweep_interval: Duration,
    stale_claim_secs: i64,
    cancel: CancellationToken,
}

impl ImportQueueWatcher {
    pub fn new(
        store: Arc<FsStateStore>,
        queue: mpsc::Sender<WorkItem>,
        config: &ImportConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            stale_claim_secs: config.stale_claim_secs,
            cancel,
        }
    }

    /// Run the sweep loop until shutdown.
    ///
    /// Starts with the recovery sweep: files stuck in `processing` by a
    /// crashed run are requeued before any new work is claimed.
    pub async fn run(self) {
        match self.store.recover_stale(self.stale_claim_secs) {
            Ok(requeued) if !requeued.is_empty() => {
                log_event!("import", "recovered", "{} stale claims requeued", requeued.len());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("[import] recovery sweep failed: {e}");
            }
        }

        log_event!("import", "started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.sweep_interval) => {}
            }

            match self.sweep().await {
                Ok(0) => {}
                Ok(n) => log_event!("import", "sweep", "{n} files processed"),
                Err(e) => tracing::warn!("[import] sweep failed: {e}"),
            }
        }

        log_event!("import", "stopped");
    }

    /// One pass over `incoming/`. Returns the number of files this watcher
    /// claimed and finished (in any direction).
    pub async fn sweep(&self) -> ImportResult<usize> {
        let pending = self.store.list_jobs(JobState::Pending)?;
        let mut processed = 0;

        for job in pending {
            if self.cancel.is_cancelled() {
                break;
            }

            let claimed = match self.store.claim_job(&job.file_name) {
                Ok(claimed) => claimed,
                // Another worker won the race; do not retry this file.
                Err(StateError::AlreadyClaimed { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            self.process(claimed).await;
            processed += 1;
        }

        Ok(processed)
    }

    /// Process one claimed file and record the outcome.
    ///
    /// Parse failures and downstream write failures are retryable for the
    /// whole file; document-level index failures are logged and skipped
    /// without failing the file.
    async fn process(&self, job: ImportJob) {
        let outcome = match parse_jsonl(&job.path) {
            Ok(docs) => {
                log_event!(
                    "import",
                    "processing",
                    "{} ({} documents)",
                    job.file_name,
                    docs.len()
                );
                match submit(&self.queue, WorkOrigin::File(job.file_name.clone()), docs).await {
                    Ok(report) => {
                        for failed in &report.failed {
                            tracing::warn!(
                                "[import] document {} skipped: {}",
                                failed.document_id,
                                failed.reason
                            );
                        }
                        JobOutcome::Indexed
                    }
                    Err(e) => JobOutcome::Failed {
                        reason: e.to_string(),
                    },
                }
            }
            Err(e) => JobOutcome::Failed {
                reason: e.to_string(),
            },
        };

        match self.store.complete_job(&job.file_name, outcome) {
            Ok(done) => {
                log_event!("import", "completed", "{} -> {}", done.file_name, done.state);
            }
            Err(e) => {
                tracing::error!("[import] failed to record outcome for {}: {e}", job.file_name);
            }
        }
    }
}
