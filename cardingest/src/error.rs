use cardstore::errors::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl IngestError {
    /// Whether redelivering the same input could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Storage(err) => matches!(
                err,
                StorageError::Upstream(_)
                    | StorageError::Throttled(_)
                    | StorageError::RetryExhausted { .. }
                    | StorageError::SQLite(_)
                    | StorageError::Io(_)
            ),
            IngestError::Queue(_) | IngestError::ObjectStore(_) | IngestError::Io(_) => true,
            IngestError::SQLite(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
