//! Error types shared by every dataset component.

use thiserror::Error;

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Primary error type for dataset operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured or default dataset file is missing.
    #[error("{0}")]
    DatasetNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    /// Malformed catalog JSON or a catalog entry missing its identifier.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Both storage variants are the same failure class at the boundary.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::StorageIo(_))
    }

    pub fn is_dataset_not_found(&self) -> bool {
        matches!(self, Self::DatasetNotFound(_))
    }
}
