use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Table request failed: {0}")]
    Upstream(String),

    #[error("Table request throttled: {0}")]
    Throttled(String),

    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Transient failures that are safe to retry for key-addressed writes and reads.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Upstream(_) | StorageError::Throttled(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
