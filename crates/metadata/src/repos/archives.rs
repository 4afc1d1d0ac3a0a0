//! Archive repository trait.

use crate::error::MetadataResult;
use crate::models::ArchiveRow;
use async_trait::async_trait;
use icebox_core::ArchiveRef;
use time::OffsetDateTime;

/// Repository for cached archives.
#[async_trait]
pub trait ArchiveRepo: Send + Sync {
    /// Insert a newly known archive.
    async fn insert_archive(&self, archive: &ArchiveRow) -> MetadataResult<()>;

    /// Get an archive by id, tombstoned or not.
    async fn get_archive(
        &self,
        account_key: &str,
        vault: &str,
        id: &str,
    ) -> MetadataResult<Option<ArchiveRow>>;

    /// Find the single live archive a reference points at.
    ///
    /// Fails with `NotFound` for zero matches and `Ambiguous` for several.
    async fn find_archive_by_ref(
        &self,
        account_key: &str,
        vault: &str,
        reference: &ArchiveRef,
    ) -> MetadataResult<ArchiveRow>;

    /// List live (non-tombstoned) archives ordered by name.
    async fn list_archives(&self, account_key: &str, vault: &str)
    -> MetadataResult<Vec<ArchiveRow>>;

    /// List every cached archive in a vault, tombstones included.
    async fn list_all_archives(
        &self,
        account_key: &str,
        vault: &str,
    ) -> MetadataResult<Vec<ArchiveRow>>;

    /// Tombstone an archive after a local delete.
    async fn mark_archive_deleted(
        &self,
        account_key: &str,
        vault: &str,
        id: &str,
        deleted_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Insert or update an archive observed in an inventory.
    ///
    /// Only `name` and `last_seen_upstream` change on existing rows.
    async fn upsert_on_reconcile(&self, archive: &ArchiveRow) -> MetadataResult<()>;

    /// Remove an archive record.
    async fn delete_archive_record(
        &self,
        account_key: &str,
        vault: &str,
        id: &str,
    ) -> MetadataResult<()>;
}
