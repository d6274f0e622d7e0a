use std::path::PathBuf;
use thiserror::Error;

use super::jobs::JobState;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("file already claimed by another worker: {file}")]
    AlreadyClaimed { file: String },

    #[error(
        "checkpoint for {table} would regress from ({have_ts}, {have_id}) to ({new_ts}, {new_id})"
    )]
    CheckpointRegression {
        table: String,
        have_ts: i64,
        have_id: i64,
        new_ts: i64,
        new_id: i64,
    },

    #[error("no such job file: {file}")]
    JobNotFound { file: String },

    #[error("job {file} is not in state {expected}")]
    InvalidState { file: String, expected: JobState },

    #[error("queue entry has no usable file name: {0}")]
    InvalidFileName(PathBuf),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StateResult<T> = Result<T, StateError>;

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
