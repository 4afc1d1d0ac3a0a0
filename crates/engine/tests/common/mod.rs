//! Common test utilities and fixtures.

use bytes::Bytes;
use icebox_core::{IceboxConfig, MemoryConfigProvider};
use icebox_engine::{Session, WaitSettings};
use icebox_metadata::SqliteStore;
use icebox_metadata::models::ArchiveRow;
use icebox_metadata::repos::ArchiveRepo;
use icebox_remote::{ArchiveStore, MemoryBackend};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

pub const ACCOUNT: &str = "AKIDTEST";
pub const REGION: &str = "us-east-1";
pub const VAULT: &str = "photos";

/// A session over an in-memory remote store and an in-memory cache.
#[allow(dead_code)]
pub struct Harness {
    pub remote: Arc<MemoryBackend>,
    pub cache: Arc<SqliteStore>,
    pub config: Arc<MemoryConfigProvider>,
    pub session: Session,
}

#[allow(dead_code)]
impl Harness {
    /// Jobs stay pending until completed by the test.
    pub async fn new() -> Self {
        Self::build(MemoryBackend::new(ACCOUNT, REGION), IceboxConfig::for_testing()).await
    }

    /// Jobs complete as soon as they are requested.
    pub async fn auto_complete() -> Self {
        Self::build(
            MemoryBackend::new(ACCOUNT, REGION).with_auto_complete(true),
            IceboxConfig::for_testing(),
        )
        .await
    }

    pub async fn with_config(config: IceboxConfig) -> Self {
        Self::build(MemoryBackend::new(ACCOUNT, REGION), config).await
    }

    async fn build(backend: MemoryBackend, config: IceboxConfig) -> Self {
        backend.create_vault(VAULT).await.expect("create vault");
        let remote = Arc::new(backend);
        let cache = Arc::new(SqliteStore::in_memory().await.expect("open cache"));
        let provider = Arc::new(MemoryConfigProvider::new(config.clone()));
        let session = Session::new(
            remote.clone(),
            cache.clone(),
            provider.clone(),
            config,
            CancellationToken::new(),
        )
        .with_wait_settings(WaitSettings::new(Duration::from_millis(5), 3));

        Self {
            remote,
            cache,
            config: provider,
            session,
        }
    }

    /// Replace the session's wait bounds.
    pub fn with_wait(mut self, interval: Duration, max_polls: u32) -> Self {
        self.session = self
            .session
            .with_wait_settings(WaitSettings::new(interval, max_polls));
        self
    }

    /// Upload `body` remotely and record it in the cache as uploaded now.
    pub async fn seed_archive(&self, name: &str, body: &[u8]) -> String {
        let id = self
            .remote
            .upload_archive(VAULT, Bytes::copy_from_slice(body), name)
            .await
            .expect("upload archive");
        self.cache
            .insert_archive(&ArchiveRow::uploaded(
                ACCOUNT,
                VAULT,
                &id,
                name,
                OffsetDateTime::now_utc(),
            ))
            .await
            .expect("cache archive");
        id
    }

    /// Upload `body` remotely only, as another client would.
    pub async fn upload_elsewhere(&self, name: &str, body: &[u8]) -> String {
        self.remote
            .upload_archive(VAULT, Bytes::copy_from_slice(body), name)
            .await
            .expect("upload archive")
    }
}
