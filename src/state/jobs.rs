//! Import job types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a queued import file.
///
/// Transitions form a DAG: `pending -> processing -> done | error`, with
/// `processing -> pending` on a retryable failure while attempts remain.
/// `error` is terminal until an operator resets the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a processing run ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// All of the file's documents were committed to the index.
    Indexed,
    /// The run failed in a retryable way (parse error, downstream write
    /// failure). The store routes the file back to pending, or to error
    /// once attempts are exhausted.
    Failed { reason: String },
}

/// One queued file and its bookkeeping.
///
/// The data file's location is the authoritative state; the sidecar record
/// carries the counters that survive moves between queue directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    /// Queue-relative file name.
    pub file_name: String,
    /// Current location of the data file.
    pub path: PathBuf,
    pub state: JobState,
    /// Times this file has left `processing` unsuccessfully.
    pub attempts: u32,
    /// Unix seconds of the most recent claim.
    pub claimed_at: Option<i64>,
    pub last_error: Option<String>,
    /// SHA-256 of the file content, computed at claim. Lets an operator spot
    /// a re-dropped identical file in status output.
    pub fingerprint: Option<String>,
}

/// Sidecar record persisted next to the data file as `<name>.job.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct JobRecord {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub claimed_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl JobRecord {
    pub(crate) fn into_job(self, file_name: String, path: PathBuf, state: JobState) -> ImportJob {
        ImportJob {
            file_name,
            path,
            state,
            attempts: self.attempts,
            claimed_at: self.claimed_at,
            last_error: self.last_error,
            fingerprint: self.fingerprint,
        }
    }
}
