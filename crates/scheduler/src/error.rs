use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage io failure: {0}")]
    Io(String),
    #[error("stored blob is corrupt: {0}")]
    Corrupt(String),
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Corrupt(value.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("coordinator is not running")]
    CoordinatorGone,
    #[error("unexpected reply: {0}")]
    Protocol(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
