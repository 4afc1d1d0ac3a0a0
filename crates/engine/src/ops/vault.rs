//! Vault operations.

use super::cached_size;
use crate::context::Session;
use crate::error::{OpError, OpResult};
use crate::jobs::{JobCoordinator, JobQuery};
use icebox_metadata::models::VaultRow;
use icebox_metadata::{Inventory, InventoryEntry, ReconcileReport, Reconciler};
use icebox_remote::{InventorySnapshot, RemoteError};
use std::collections::HashSet;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument};

/// Default age under which a completed inventory job is reused.
pub const DEFAULT_SYNC_MAX_AGE: Duration = Duration::hours(24);

/// Options for [`sync_vault`].
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Block until the inventory job completes.
    pub wait: bool,
    /// Drop records of archives that disappeared without explanation.
    pub fix: bool,
    /// Reuse a completed inventory job younger than this.
    pub max_age: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            wait: false,
            fix: false,
            max_age: DEFAULT_SYNC_MAX_AGE,
        }
    }
}

/// Refresh cached vaults from the remote listing and return their names.
///
/// Cached vaults that no longer exist remotely are dropped.
#[instrument(skip(session), fields(region = %session.region()))]
pub async fn list_vaults(session: &Session) -> OpResult<Vec<String>> {
    let account = session.account_key();
    let region = session.region();
    let cache = session.cache();

    let remote = session.remote().list_vaults().await?;
    for info in &remote {
        let mut row = VaultRow::new(account, &info.name, region);
        row.cached_size = cached_size(info.size);
        cache.upsert_vault(&row).await?;
    }

    let live: HashSet<&str> = remote.iter().map(|v| v.name.as_str()).collect();
    let mut names = Vec::new();
    for row in cache.list_vaults(account, region).await? {
        if live.contains(row.name.as_str()) {
            names.push(row.name);
        } else {
            debug!(vault = %row.name, "dropping vault no longer listed remotely");
            cache.delete_vault(account, &row.name, region).await?;
        }
    }
    Ok(names)
}

/// Create a vault remotely and cache it.
#[instrument(skip(session))]
pub async fn create_vault(session: &Session, name: &str) -> OpResult<()> {
    session.remote().create_vault(name).await?;
    session
        .cache()
        .upsert_vault(&VaultRow::new(
            session.account_key(),
            name,
            session.region(),
        ))
        .await?;
    info!(vault = %name, "created vault");
    Ok(())
}

/// Delete an empty vault remotely, then forget it locally.
#[instrument(skip(session))]
pub async fn delete_vault(session: &Session, name: &str) -> OpResult<()> {
    session.remote().delete_vault(name).await?;
    session
        .cache()
        .delete_vault(session.account_key(), name, session.region())
        .await?;
    info!(vault = %name, "deleted vault");
    Ok(())
}

/// Bring the cached archive list of `name` in line with a remote inventory.
#[instrument(skip(session, options), fields(wait = options.wait, fix = options.fix))]
pub async fn sync_vault(
    session: &Session,
    name: &str,
    options: SyncOptions,
) -> OpResult<ReconcileReport> {
    let account = session.account_key();
    let region = session.region();

    let info = session
        .remote()
        .describe_vault(name)
        .await
        .map_err(|err| match err {
            RemoteError::VaultNotFound(_) => OpError::NotFound(format!("vault {name:?}")),
            other => other.into(),
        })?;
    let cache = session.cache();
    let mut row = cache
        .get_vault(account, name, region)
        .await?
        .unwrap_or_else(|| VaultRow::new(account, name, region));
    row.cached_size = cached_size(info.size);
    cache.upsert_vault(&row).await?;

    let query = JobQuery::inventory(name, Some(options.max_age));
    let job = JobCoordinator::new(session)
        .get_or_create(name, &query, options.wait)
        .await?;

    let body = session.remote().get_job_output(name, &job.id, None).await?;
    let snapshot = InventorySnapshot::from_json(&body)?;
    let inventory = inventory_from_snapshot(name, job.creation_time, snapshot);
    debug!(
        vault = %name,
        job = %job.id,
        entries = inventory.entries.len(),
        "parsed inventory"
    );

    let report = Reconciler::new(cache, account, region)
        .reconcile(&inventory, options.fix, OffsetDateTime::now_utc())
        .await?;
    Ok(report)
}

/// Convert remote inventory output into the reconciler's input.
///
/// Empty descriptions become unnamed archives.
pub fn inventory_from_snapshot(
    vault: &str,
    job_creation_time: OffsetDateTime,
    snapshot: InventorySnapshot,
) -> Inventory {
    let entries = snapshot
        .archive_list
        .into_iter()
        .map(|archive| InventoryEntry {
            id: archive.archive_id,
            name: Some(archive.archive_description).filter(|d| !d.is_empty()),
            creation_date: archive.creation_date,
        })
        .collect();
    Inventory {
        vault: vault.to_string(),
        inventory_date: snapshot.inventory_date,
        job_creation_time,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_empty_description_is_unnamed() {
        let snapshot = InventorySnapshot::from_json(
            br#"{
                "InventoryDate": "2024-06-14T00:00:00Z",
                "ArchiveList": [
                    {"ArchiveId": "a1", "ArchiveDescription": "", "CreationDate": "2024-06-01T00:00:00Z", "Size": 1},
                    {"ArchiveId": "a2", "ArchiveDescription": "b.tar", "CreationDate": "2024-06-02T00:00:00Z", "Size": 2}
                ]
            }"#,
        )
        .unwrap();

        let inventory =
            inventory_from_snapshot("photos", datetime!(2024-06-13 00:00 UTC), snapshot);
        assert_eq!(inventory.vault, "photos");
        assert_eq!(inventory.job_creation_time, datetime!(2024-06-13 00:00 UTC));
        assert_eq!(inventory.entries[0].name, None);
        assert_eq!(inventory.entries[1].name.as_deref(), Some("b.tar"));
    }
}
