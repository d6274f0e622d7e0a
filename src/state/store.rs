//! Filesystem-backed state store.
//!
//! Checkpoints live under `<state>/checkpoints/<table>.json`, written to a
//! temporary file and promoted with an atomic rename so a crash mid-write
//! never leaves a reader a partial record. Import jobs are persisted as file
//! location across the queue directories; `fs::rename` of the data file is
//! the claim/commit primitive, so two workers racing on one file get exactly
//! one winner and the loser observes `AlreadyClaimed`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::checkpoint::SyncCheckpoint;
use super::error::{StateError, StateResult};
use super::jobs::{ImportJob, JobOutcome, JobRecord, JobState};

const SIDECAR_SUFFIX: &str = ".job.json";

/// Per-state counts for the status surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
}

/// Durable store for checkpoints and import jobs.
#[derive(Debug)]
pub struct FsStateStore {
    checkpoint_dir: PathBuf,
    incoming: PathBuf,
    progress: PathBuf,
    done: PathBuf,
    error: PathBuf,
    max_attempts: u32,
}

impl FsStateStore {
    /// Open (creating if needed) the state directories. Failure here is a
    /// fatal configuration error: the service must not start with a state
    /// store it cannot write.
    pub fn open(
        state_path: &Path,
        queue_root: &Path,
        max_attempts: u32,
    ) -> StateResult<Self> {
        let checkpoint_dir = state_path.join("checkpoints");
        let incoming = queue_root.join("incoming");
        let progress = queue_root.join(".progress");
        let done = queue_root.join(".done");
        let error = queue_root.join(".error");

        for dir in [&checkpoint_dir, &incoming, &progress, &done, &error] {
            fs::create_dir_all(dir).map_err(|e| StateError::io(dir.clone(), e))?;
        }

        Ok(Self {
            checkpoint_dir,
            incoming,
            progress,
            done,
            error,
            max_attempts,
        })
    }

    /// Directory new import files land in.
    pub fn incoming_dir(&self) -> &Path {
        &self.incoming
    }

    // ---- checkpoints ----

    /// Load the checkpoint for a table, if one has been committed.
    pub fn load_checkpoint(&self, table: &str) -> StateResult<Option<SyncCheckpoint>> {
        let path = self.checkpoint_path(table);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    /// Durably commit a checkpoint. Rejects regressions: the cursor is
    /// monotonically non-decreasing, advanced only after the corresponding
    /// batch is confirmed indexed.
    pub fn commit_checkpoint(&self, checkpoint: &SyncCheckpoint) -> StateResult<()> {
        if let Some(existing) = self.load_checkpoint(&checkpoint.table_name)? {
            if checkpoint.position() < existing.position() {
                return Err(StateError::CheckpointRegression {
                    table: checkpoint.table_name.clone(),
                    have_ts: existing.last_seen_timestamp,
                    have_id: existing.last_seen_id,
                    new_ts: checkpoint.last_seen_timestamp,
                    new_id: checkpoint.last_seen_id,
                });
            }
        }

        let path = self.checkpoint_path(&checkpoint.table_name);
        let json = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&path, &json)
    }

    fn checkpoint_path(&self, table: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{table}.json"))
    }

    // ---- import jobs ----

    /// Copy an external file into the queue as a pending job.
    pub fn enqueue(&self, src: &Path) -> StateResult<ImportJob> {
        let file_name = queue_file_name(src)?;
        let dst = self.incoming.join(&file_name);
        fs::copy(src, &dst).map_err(|e| StateError::io(dst.clone(), e))?;
        Ok(JobRecord::default().into_job(file_name, dst, JobState::Pending))
    }

    /// List jobs in one state, by scanning the corresponding directory.
    pub fn list_jobs(&self, state: JobState) -> StateResult<Vec<ImportJob>> {
        let dir = self.dir_for(state);
        let mut jobs = Vec::new();

        let entries = fs::read_dir(dir).map_err(|e| StateError::io(dir.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(dir.clone(), e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(SIDECAR_SUFFIX) || name.starts_with('.') {
                continue;
            }
            let record = self.load_record(dir, name)?;
            jobs.push(record.into_job(name.to_string(), path, state));
        }

        jobs.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(jobs)
    }

    /// Atomically claim a pending file for processing.
    ///
    /// The rename of the data file is the claim. When two workers race, the
    /// filesystem picks the winner; the loser's rename fails with `NotFound`
    /// and surfaces as `AlreadyClaimed`, after which it must not retry this
    /// file.
    pub fn claim_job(&self, file_name: &str) -> StateResult<ImportJob> {
        let src = self.incoming.join(file_name);
        let dst = self.progress.join(file_name);

        match fs::rename(&src, &dst) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StateError::AlreadyClaimed {
                    file: file_name.to_string(),
                });
            }
            Err(e) => return Err(StateError::io(src, e)),
        }

        let mut record = self.take_record(&self.incoming, file_name)?;
        record.claimed_at = Some(chrono::Utc::now().timestamp());
        record.fingerprint = Some(file_fingerprint(&dst)?);
        self.store_record(&self.progress, file_name, &record)?;

        Ok(record.into_job(file_name.to_string(), dst, JobState::Processing))
    }

    /// Finish a processing run. `Indexed` commits the file to `done`;
    /// `Failed` routes it back to `pending` while attempts remain, else to
    /// `error`, where it stays until an operator resets it.
    pub fn complete_job(&self, file_name: &str, outcome: JobOutcome) -> StateResult<ImportJob> {
        let src = self.progress.join(file_name);
        if !src.exists() {
            return Err(StateError::InvalidState {
                file: file_name.to_string(),
                expected: JobState::Processing,
            });
        }

        let mut record = self.take_record(&self.progress, file_name)?;

        let (dir, state) = match outcome {
            JobOutcome::Indexed => {
                record.last_error = None;
                (&self.done, JobState::Done)
            }
            JobOutcome::Failed { reason } => {
                record.attempts += 1;
                record.last_error = Some(reason);
                if record.attempts < self.max_attempts {
                    (&self.incoming, JobState::Pending)
                } else {
                    (&self.error, JobState::Error)
                }
            }
        };

        // Sidecar first: if we crash between the two writes the data file is
        // still in .progress and the recovery sweep will requeue it, which is
        // safe because indexing is idempotent.
        self.store_record(dir, file_name, &record)?;
        let dst = dir.join(file_name);
        fs::rename(&src, &dst).map_err(|e| StateError::io(src, e))?;

        Ok(record.into_job(file_name.to_string(), dst, state))
    }

    /// Requeue files stuck in `processing` longer than `stale_secs`.
    ///
    /// Run at orchestrator start: a crash mid-processing leaves the file in
    /// `.progress/` with nobody working on it. Requeueing increments
    /// attempts, so a file that keeps killing its worker still converges to
    /// `error`.
    pub fn recover_stale(&self, stale_secs: i64) -> StateResult<Vec<ImportJob>> {
        let now = chrono::Utc::now().timestamp();
        let mut requeued = Vec::new();

        for job in self.list_jobs(JobState::Processing)? {
            let stale = match job.claimed_at {
                Some(at) => now - at >= stale_secs,
                // No sidecar survived; nothing holds this claim.
                None => true,
            };
            if !stale {
                continue;
            }

            let mut record = self.take_record(&self.progress, &job.file_name)?;
            record.attempts += 1;
            record.claimed_at = None;
            self.store_record(&self.incoming, &job.file_name, &record)?;

            let src = self.progress.join(&job.file_name);
            let dst = self.incoming.join(&job.file_name);
            fs::rename(&src, &dst).map_err(|e| StateError::io(src, e))?;

            requeued.push(record.into_job(job.file_name, dst, JobState::Pending));
        }

        Ok(requeued)
    }

    /// Operator reset: move a file out of `error` back to `pending` with
    /// attempts cleared. The only path out of `error`.
    pub fn reset_error(&self, file_name: &str) -> StateResult<ImportJob> {
        let src = self.error.join(file_name);
        if !src.exists() {
            return Err(StateError::JobNotFound {
                file: file_name.to_string(),
            });
        }

        let mut record = self.take_record(&self.error, file_name)?;
        record.attempts = 0;
        record.claimed_at = None;
        record.last_error = None;
        self.store_record(&self.incoming, file_name, &record)?;

        let dst = self.incoming.join(file_name);
        fs::rename(&src, &dst).map_err(|e| StateError::io(src, e))?;

        Ok(record.into_job(file_name.to_string(), dst, JobState::Pending))
    }

    /// Per-state queue depths.
    pub fn queue_counts(&self) -> StateResult<QueueCounts> {
        Ok(QueueCounts {
            pending: self.list_jobs(JobState::Pending)?.len(),
            processing: self.list_jobs(JobState::Processing)?.len(),
            done: self.list_jobs(JobState::Done)?.len(),
            error: self.list_jobs(JobState::Error)?.len(),
        })
    }

    fn dir_for(&self, state: JobState) -> &PathBuf {
        match state {
            JobState::Pending => &self.incoming,
            JobState::Processing => &self.progress,
            JobState::Done => &self.done,
            JobState::Error => &self.error,
        }
    }

    fn sidecar_path(dir: &Path, file_name: &str) -> PathBuf {
        dir.join(format!("{file_name}{SIDECAR_SUFFIX}"))
    }

    fn load_record(&self, dir: &Path, file_name: &str) -> StateResult<JobRecord> {
        let path = Self::sidecar_path(dir, file_name);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(JobRecord::default()),
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    /// Load a sidecar and remove it from its current directory.
    fn take_record(&self, dir: &Path, file_name: &str) -> StateResult<JobRecord> {
        let record = self.load_record(dir, file_name)?;
        let path = Self::sidecar_path(dir, file_name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StateError::io(path, e)),
        }
        Ok(record)
    }

    fn store_record(&self, dir: &Path, file_name: &str, record: &JobRecord) -> StateResult<()> {
        let path = Self::sidecar_path(dir, file_name);
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json)
    }
}

/// Write bytes to a temporary file in the target's directory, then promote
/// with an atomic rename. A reader never observes a partial record.
fn write_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StateError::InvalidFileName(path.to_path_buf()))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| StateError::io(path.to_path_buf(), e))?;
    tmp.persist(path)
        .map_err(|e| StateError::io(path.to_path_buf(), e.error))?;
    Ok(())
}

fn queue_file_name(path: &Path) -> StateResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| StateError::InvalidFileName(path.to_path_buf()))
}

/// SHA-256 of the file content, hex encoded.
fn file_fingerprint(path: &Path) -> StateResult<String> {
    let mut file = fs::File::open(path).map_err(|e| StateError::io(path.to_path_buf(), e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| StateError::io(path.to_path_buf(), e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> FsStateStore {
        FsStateStore::open(&temp.path().join("state"), &temp.path().join("queue"), 3).unwrap()
    }

    fn drop_file(store: &FsStateStore, name: &str, content: &str) {
        fs::write(store.incoming_dir().join(name), content).unwrap();
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(store.load_checkpoint("products").unwrap().is_none());

        let cp = SyncCheckpoint::origin("products").advanced_to(1000, 42);
        store.commit_checkpoint(&cp).unwrap();

        let loaded = store.load_checkpoint("products").unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn test_checkpoint_rejects_regression() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let cp = SyncCheckpoint::origin("products").advanced_to(1000, 42);
        store.commit_checkpoint(&cp).unwrap();

        // Same position is an allowed no-op.
        store.commit_checkpoint(&cp).unwrap();

        // Earlier timestamp regresses.
        let older = SyncCheckpoint::origin("products").advanced_to(999, 99);
        assert!(matches!(
            store.commit_checkpoint(&older),
            Err(StateError::CheckpointRegression { .. })
        ));

        // Same timestamp, lower id regresses too.
        let older = SyncCheckpoint::origin("products").advanced_to(1000, 41);
        assert!(store.commit_checkpoint(&older).is_err());
    }

    #[test]
    fn test_claim_moves_file_and_stamps_record() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        drop_file(&store, "batch_20240101.jsonl", "{}\n");

        let job = store.claim_job("batch_20240101.jsonl").unwrap();
        assert_eq!(job.state, JobState::Processing);
        assert!(job.claimed_at.is_some());
        assert!(job.fingerprint.is_some());
        assert!(job.path.exists());

        // The file left incoming; a second claim loses.
        assert!(matches!(
            store.claim_job("batch_20240101.jsonl"),
            Err(StateError::AlreadyClaimed { .. })
        ));
    }

    #[test]
    fn test_complete_job_success() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        drop_file(&store, "a.jsonl", "{}\n");

        store.claim_job("a.jsonl").unwrap();
        let job = store.complete_job("a.jsonl", JobOutcome::Indexed).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(store.list_jobs(JobState::Done).unwrap().len(), 1);
        assert!(store.list_jobs(JobState::Processing).unwrap().is_empty());
    }

    #[test]
    fn test_failure_requeues_until_attempts_exhausted() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        drop_file(&store, "bad.jsonl", "not json\n");

        // max_attempts = 3: two retryable failures requeue, the third lands
        // in error.
        for expected_attempts in 1..=2 {
            store.claim_job("bad.jsonl").unwrap();
            let job = store
                .complete_job(
                    "bad.jsonl",
                    JobOutcome::Failed {
                        reason: "parse failure".to_string(),
                    },
                )
                .unwrap();
            assert_eq!(job.state, JobState::Pending);
            assert_eq!(job.attempts, expected_attempts);
        }

        store.claim_job("bad.jsonl").unwrap();
        let job = store
            .complete_job(
                "bad.jsonl",
                JobOutcome::Failed {
                    reason: "parse failure".to_string(),
                },
            )
            .unwrap();
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.last_error.as_deref(), Some("parse failure"));

        // Error is terminal: no file in incoming, nothing claimable.
        assert!(store.list_jobs(JobState::Pending).unwrap().is_empty());
    }

    #[test]
    fn test_reset_error_restores_pending() {
        let temp = TempDir::new().unwrap();
        let store = FsStateStore::open(
            &temp.path().join("state"),
            &temp.path().join("queue"),
            1,
        )
        .unwrap();
        drop_file(&store, "bad.jsonl", "x\n");

        store.claim_job("bad.jsonl").unwrap();
        store
            .complete_job(
                "bad.jsonl",
                JobOutcome::Failed {
                    reason: "boom".to_string(),
                },
            )
            .unwrap();
        assert_eq!(store.list_jobs(JobState::Error).unwrap().len(), 1);

        let job = store.reset_error("bad.jsonl").unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert_eq!(store.list_jobs(JobState::Pending).unwrap().len(), 1);
    }

    #[test]
    fn test_recover_stale_requeues_with_attempt() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        drop_file(&store, "stuck.jsonl", "{}\n");

        store.claim_job("stuck.jsonl").unwrap();

        // Claim is fresh: not stale yet.
        assert!(store.recover_stale(3600).unwrap().is_empty());

        // Zero threshold treats any claim as stuck.
        let requeued = store.recover_stale(0).unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].state, JobState::Pending);
        assert_eq!(requeued[0].attempts, 1);
        assert!(store.list_jobs(JobState::Processing).unwrap().is_empty());
    }

    #[test]
    fn test_list_jobs_skips_sidecars() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        drop_file(&store, "a.jsonl", "{}\n");
        drop_file(&store, "b.jsonl", "{}\n");

        store.claim_job("a.jsonl").unwrap();
        store
            .complete_job(
                "a.jsonl",
                JobOutcome::Failed {
                    reason: "x".to_string(),
                },
            )
            .unwrap();

        // a.jsonl is back in incoming with a sidecar next to it; the sidecar
        // must not show up as a job.
        let pending = store.list_jobs(JobState::Pending).unwrap();
        let names: Vec<&str> = pending.iter().map(|j| j.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.jsonl", "b.jsonl"]);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].attempts, 0);
    }
}
