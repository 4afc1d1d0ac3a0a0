//! Remote store error types.

use thiserror::Error;

/// Remote archive store errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("vault not found: {0}")]
    VaultNotFound(String),

    #[error("vault not empty: {0}")]
    VaultNotEmpty(String),

    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid inventory: {0}")]
    InvalidInventory(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("remote service error: {0}")]
    Sdk(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for remote store operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
