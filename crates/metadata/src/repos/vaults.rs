//! Vault repository trait.

use crate::error::MetadataResult;
use crate::models::VaultRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for cached vaults.
#[async_trait]
pub trait VaultRepo: Send + Sync {
    /// Insert a vault or refresh its cached size.
    ///
    /// An existing `last_synced_at` is kept when the new row carries none.
    async fn upsert_vault(&self, vault: &VaultRow) -> MetadataResult<()>;

    /// Get a vault by its key.
    async fn get_vault(
        &self,
        account_key: &str,
        name: &str,
        region: &str,
    ) -> MetadataResult<Option<VaultRow>>;

    /// List vaults in a region, ordered by name.
    async fn list_vaults(&self, account_key: &str, region: &str) -> MetadataResult<Vec<VaultRow>>;

    /// Delete a vault. Returns false if it was not cached.
    async fn delete_vault(&self, account_key: &str, name: &str, region: &str)
    -> MetadataResult<bool>;

    /// Record a completed sync, creating the vault row if needed.
    async fn record_vault_sync(
        &self,
        account_key: &str,
        name: &str,
        region: &str,
        synced_at: OffsetDateTime,
    ) -> MetadataResult<()>;
}
