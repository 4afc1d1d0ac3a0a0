//! Remote archive store client for icebox.
//!
//! This crate provides:
//! - The `ArchiveStore` trait: vaults, archives, and asynchronous jobs
//! - Job, vault and inventory models, including inventory JSON parsing
//! - Backends: Amazon Glacier and an in-memory store

pub mod backends;
pub mod error;
pub mod models;
pub mod traits;

pub use backends::{glacier::GlacierBackend, memory::MemoryBackend};
pub use error::{RemoteError, RemoteResult};
pub use models::{
    ByteRange, InventoryArchive, InventorySnapshot, JobAction, JobHandle, JobStatus, VaultInfo,
    split_ranges,
};
pub use traits::ArchiveStore;

use std::sync::Arc;

/// Connect to the remote store for `region`.
pub async fn connect(region: &str) -> RemoteResult<Arc<dyn ArchiveStore>> {
    if region.trim().is_empty() {
        return Err(RemoteError::Config("region cannot be empty".to_string()));
    }
    let backend = GlacierBackend::new(region).await?;
    tracing::debug!(region = %region, "connected to remote store");
    Ok(Arc::new(backend))
}
