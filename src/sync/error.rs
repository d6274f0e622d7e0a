use thiserror::Error;

use crate::enrich::EmbedError;
use crate::import::ImportError;
use crate::index::StorageError;
use crate::source::SourceError;
use crate::state::StateError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("work queue closed")]
    QueueClosed,
}

pub type SyncResult<T> = Result<T, SyncError>;
