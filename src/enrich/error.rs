use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("embedding request failed: {0}")]
    Provider(String),

    #[error("embedding call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("provider returned {got} embeddings for {expected} inputs")]
    BatchMismatch { expected: usize, got: usize },

    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),

    #[error("missing API key: set {env}")]
    MissingApiKey { env: String },
}

pub type EmbedResult<T> = Result<T, EmbedError>;
