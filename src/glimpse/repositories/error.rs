use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage initialization failed: {message}")]
    Initialization { message: String },
}

pub type StorageResult<T> = Result<T, StorageError>;
