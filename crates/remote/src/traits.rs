//! Remote archive store trait.

use crate::error::RemoteResult;
use crate::models::{ByteRange, JobHandle, VaultInfo};
use async_trait::async_trait;
use bytes::Bytes;

/// A remote cold-storage service holding vaults of archives.
///
/// Every call is scoped to the region the store was built for. Job state is
/// owned by the remote side; callers only observe it.
#[async_trait]
pub trait ArchiveStore: Send + Sync + 'static {
    /// Opaque key identifying the account namespace this store talks to.
    ///
    /// Two stores returning the same key must never see colliding vault or
    /// archive namespaces.
    fn account_key(&self) -> &str;

    /// Region all calls are made against.
    fn region(&self) -> &str;

    /// List all vaults in the region.
    async fn list_vaults(&self) -> RemoteResult<Vec<VaultInfo>>;

    /// Describe one vault. Fails with `VaultNotFound` if it does not exist.
    async fn describe_vault(&self, vault: &str) -> RemoteResult<VaultInfo>;

    /// Create a vault. Creating an existing vault succeeds.
    async fn create_vault(&self, vault: &str) -> RemoteResult<()>;

    /// Delete a vault. Fails with `VaultNotEmpty` if it still holds archives.
    async fn delete_vault(&self, vault: &str) -> RemoteResult<()>;

    /// Upload an archive and return its remote-assigned id.
    async fn upload_archive(
        &self,
        vault: &str,
        data: Bytes,
        description: &str,
    ) -> RemoteResult<String>;

    /// Delete an archive.
    async fn delete_archive(&self, vault: &str, archive_id: &str) -> RemoteResult<()>;

    /// List the live jobs of a vault.
    async fn list_jobs(&self, vault: &str) -> RemoteResult<Vec<JobHandle>>;

    /// Refresh one job.
    async fn describe_job(&self, vault: &str, job_id: &str) -> RemoteResult<JobHandle>;

    /// Request a new inventory of a vault.
    async fn request_inventory_job(&self, vault: &str) -> RemoteResult<JobHandle>;

    /// Request retrieval of one archive.
    async fn request_archive_retrieval_job(
        &self,
        vault: &str,
        archive_id: &str,
    ) -> RemoteResult<JobHandle>;

    /// Read the output of a succeeded job, optionally a byte range of it.
    async fn get_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<ByteRange>,
    ) -> RemoteResult<Bytes>;
}
