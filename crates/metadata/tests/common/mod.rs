//! Common test utilities and fixtures.

use icebox_metadata::models::ArchiveRow;
use icebox_metadata::{MetadataResult, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub const ACCOUNT: &str = "AKIDTEST";
pub const REGION: &str = "us-east-1";
pub const VAULT: &str = "photos";

/// Fixed "current time" shared by tests.
pub const NOW: OffsetDateTime = datetime!(2024-06-15 12:00 UTC);

/// A file-backed test store that cleans up on drop.
#[allow(dead_code)]
pub struct TestCache {
    pub store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestCache {
    /// Create a store in a fresh temporary directory.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("cache.db")).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }
}

/// An archive uploaded `age` before [`NOW`].
#[allow(dead_code)]
pub fn uploaded(id: &str, name: &str, age: Duration) -> ArchiveRow {
    ArchiveRow::uploaded(ACCOUNT, VAULT, id, name, NOW - age)
}
