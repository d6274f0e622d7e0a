//! Durable sync state: per-table checkpoints and the import-file queue.
//!
//! This module is the only owner of persisted state. Checkpoints are
//! per-table JSON records promoted into place with an atomic rename; import
//! jobs are persisted as file location across the queue directories, with
//! the claim implemented as a single atomic rename so concurrent workers
//! racing on one file produce exactly one winner.

mod checkpoint;
mod error;
mod jobs;
mod store;

pub use checkpoint::SyncCheckpoint;
pub use error::{StateError, StateResult};
pub use jobs::{ImportJob, JobOutcome, JobState};
pub use store::{FsStateStore, QueueCounts};
