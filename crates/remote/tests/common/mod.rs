//! Common test utilities and fixtures.

use bytes::Bytes;
use icebox_remote::{ArchiveStore, MemoryBackend};

pub const VAULT: &str = "photos";

/// A memory store with one vault holding the given `(description, body)` archives.
/// Returns the store and the archive ids in insertion order.
pub async fn seeded_store(archives: &[(&str, &[u8])]) -> (MemoryBackend, Vec<String>) {
    let store = MemoryBackend::new("AKIDTEST", "us-east-1");
    store.create_vault(VAULT).await.expect("create vault");

    let mut ids = Vec::with_capacity(archives.len());
    for (description, body) in archives {
        let id = store
            .upload_archive(VAULT, Bytes::copy_from_slice(body), description)
            .await
            .expect("upload archive");
        ids.push(id);
    }
    (store, ids)
}
