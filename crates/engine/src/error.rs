//! Operation error types.

use icebox_metadata::MetadataError;
use icebox_remote::RemoteError;

/// Exit status asking the caller to retry later (`EX_TEMPFAIL`).
pub const EXIT_RETRY: u8 = 75;
/// Exit status for every other failure.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status after an interrupt.
pub const EXIT_CANCELLED: u8 = 130;

/// Coarse classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A remote job is in flight; nothing failed.
    Retryable,
    Fatal,
    NotFound,
    Timeout,
    Cancelled,
}

/// Operation error type.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// Pending remote work. Messages are ordered: completed items first,
    /// then each pending condition.
    #[error("{}", .0.join("\n"))]
    Retryable(Vec<String>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("{0} failed remotely")]
    JobFailed(String),

    #[error("retrieval refused: {0}")]
    PolicyRefused(String),

    #[error("{0}")]
    Usage(String),

    #[error("job {job} returned {received} bytes, expected {expected}")]
    ShortOutput {
        job: String,
        expected: u64,
        received: u64,
    },

    /// Several independent operations failed; messages in input order.
    #[error("{}", .0.join("\n"))]
    Batch(Vec<String>),

    #[error("cache error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("{0}")]
    Core(#[from] icebox_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpError {
    /// A single pending condition.
    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retryable(vec![message.into()])
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Retryable(_) => ErrorKind::Retryable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Metadata(MetadataError::NotFound(_)) => ErrorKind::NotFound,
            _ => ErrorKind::Fatal,
        }
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Retryable(_) => "retry",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::JobFailed(_) => "job_failed",
            Self::PolicyRefused(_) => "policy_refused",
            Self::Usage(_) => "usage",
            Self::ShortOutput { .. } => "short_output",
            Self::Batch(_) => "batch_failed",
            Self::Metadata(_) => "cache_error",
            Self::Remote(_) => "remote_error",
            Self::Core(_) => "invalid_input",
            Self::Io(_) => "io_error",
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Retryable => EXIT_RETRY,
            ErrorKind::Cancelled => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        }
    }
}

/// Result type for operations.
pub type OpResult<T> = std::result::Result<T, OpError>;
