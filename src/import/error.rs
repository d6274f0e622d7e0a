use std::path::PathBuf;
use thiserror::Error;

use crate::state::StateError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path} at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

pub type ImportResult<T> = Result<T, ImportError>;
