use tantivy::TantivyError;
use tantivy::directory::error::OpenDirectoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("directory error: {0}")]
    Directory(#[from] OpenDirectoryError),

    #[error("invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned")]
    LockPoisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;
