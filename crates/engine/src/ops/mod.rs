//! Top-level operations, one module per command group.

pub mod archive;
pub mod jobs;
pub mod vault;

use crate::error::OpError;
use icebox_metadata::MetadataError;

/// Map a failed local lookup to a user-facing `NotFound` naming `what`.
pub(crate) fn not_found_as(what: String) -> impl FnOnce(MetadataError) -> OpError {
    move |err| match err {
        MetadataError::NotFound(_) => OpError::NotFound(what),
        other => OpError::Metadata(other),
    }
}

/// Clamp a remote byte count into the cache's signed column.
pub(crate) fn cached_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
