use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("query on table {table} timed out after {timeout_secs}s")]
    Timeout { table: String, timeout_secs: u64 },

    #[error("source unreachable: {0}")]
    Unreachable(String),
}

pub type SourceResult<T> = Result<T, SourceError>;
