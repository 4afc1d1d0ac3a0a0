//! Local cache of remote vault and archive metadata.
//!
//! This crate provides:
//! - Vault and archive records scoped by account key
//! - A SQLite-backed store with explicit per-pass transactions
//! - Resolution between archive references and cached records
//! - Reconciliation of upstream inventory snapshots into the cache

pub mod error;
pub mod models;
pub mod reconcile;
pub mod repos;
pub mod resolver;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use reconcile::{Inconsistency, Inventory, InventoryEntry, ReconcileReport, Reconciler};
pub use resolver::ListedArchive;
pub use store::{CacheStore, CacheTransaction, SqliteStore};

use std::path::Path;
use std::sync::Arc;

/// Open the cache store at `path`, creating it if missing.
pub async fn open(path: impl AsRef<Path>) -> MetadataResult<Arc<SqliteStore>> {
    let store = SqliteStore::new(path).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("cache.db");

        let store = open(&db_path).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
