//! Cache store error types.

use thiserror::Error;

/// Cache store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous reference {reference:?}: matches {matches} archives")]
    Ambiguous { reference: String, matches: usize },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid reference: {0}")]
    Reference(#[from] icebox_core::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cache store operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
