//! Inventory reconciliation.
//!
//! An inventory is a stale, lagging view of a vault. Merging one into the
//! cache refreshes `last_seen_upstream` for every listed archive, flags
//! contradictions as warnings, and only drops records whose absence is
//! actually explained: a local delete older than the inventory, or (with
//! `fix`) an archive that should have been listed but was not.
//!
//! A pass is planned in memory from the rows read inside a transaction, then
//! applied and committed as one unit together with the vault's sync time.

use crate::error::MetadataResult;
use crate::models::ArchiveRow;
use crate::repos::{ArchiveRepo, VaultRepo};
use crate::store::CacheStore;
use icebox_core::{ArchiveRef, INVENTORY_LAG};
use std::collections::{HashMap, HashSet};
use std::fmt;
use time::OffsetDateTime;
use tracing::{info, warn};

/// One archive listed in an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub id: String,
    /// Archive description. Empty descriptions are `None`.
    pub name: Option<String>,
    pub creation_date: OffsetDateTime,
}

/// A parsed inventory ready to be merged.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub vault: String,
    /// The as-of date the inventory claims.
    pub inventory_date: OffsetDateTime,
    /// When the inventory job was requested.
    pub job_creation_time: OffsetDateTime,
    pub entries: Vec<InventoryEntry>,
}

impl Inventory {
    /// The time every listed archive is known to have existed by.
    ///
    /// Inventories are not regenerated on every request, so anything listed
    /// existed at least `INVENTORY_LAG` before the job was created even when
    /// the claimed date is older.
    pub fn effective_seen_time(&self) -> OffsetDateTime {
        self.inventory_date
            .max(self.job_creation_time - INVENTORY_LAG)
    }
}

/// A contradiction between the cache and an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    Renamed {
        id: String,
        from: String,
        to: String,
        fixed: bool,
    },
    /// Tombstoned before the inventory date, yet still listed.
    DeletionRejected { archive: String },
    /// Tombstoned after the inventory date and still listed.
    DeletionPending { archive: String },
    /// Missing although it was seen before or is old enough to be listed.
    Disappeared { archive: String, removed: bool },
    /// Missing, but too recent to be expected in this inventory.
    NotYetInInventory { archive: String },
}

impl Inconsistency {
    /// Reference of the archive the warning is about.
    pub fn archive(&self) -> String {
        match self {
            Self::Renamed { id, .. } => ArchiveRef::render(None, id, true),
            Self::DeletionRejected { archive }
            | Self::DeletionPending { archive }
            | Self::Disappeared { archive, .. }
            | Self::NotYetInInventory { archive } => archive.clone(),
        }
    }
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renamed {
                id,
                from,
                to,
                fixed,
            } => {
                write!(f, "archive {id:?} appears to have changed name from {from:?} to {to:?}")?;
                if *fixed {
                    f.write_str(" (fixed)")?;
                }
                Ok(())
            }
            Self::DeletionRejected { archive } => {
                write!(f, "archive {archive:?} marked deleted but still present")
            }
            Self::DeletionPending { archive } => {
                write!(f, "archive {archive:?} deletion not yet in inventory")
            }
            Self::Disappeared { archive, removed } => {
                write!(f, "archive disappeared: {archive:?}")?;
                if *removed {
                    f.write_str(" (removed from cache)")?;
                }
                Ok(())
            }
            Self::NotYetInInventory { archive } => {
                write!(f, "new archive not yet in inventory: {archive:?}")
            }
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    /// Records dropped because a deletion was confirmed.
    pub purged: usize,
    /// Records dropped as unexplained disappearances under `fix`.
    pub removed: usize,
    pub warnings: Vec<Inconsistency>,
}

/// How to treat a cached archive missing from an inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingVerdict {
    ConfirmedDeletion,
    Disappeared,
    NotYetInInventory,
}

/// Classify a cached archive absent from an inventory dated `inventory_date`.
pub fn classify_missing(row: &ArchiveRow, inventory_date: OffsetDateTime) -> MissingVerdict {
    match row.deleted_here {
        Some(deleted) if deleted < inventory_date => MissingVerdict::ConfirmedDeletion,
        None if row.last_seen_upstream.is_some()
            || row.created_here < inventory_date - INVENTORY_LAG =>
        {
            MissingVerdict::Disappeared
        }
        _ => MissingVerdict::NotYetInInventory,
    }
}

/// Writes computed for one pass.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// Rows to upsert; existing rows only take `name` and `last_seen_upstream`.
    pub upserts: Vec<ArchiveRow>,
    /// Ids to drop.
    pub purges: Vec<String>,
    /// References of tombstoned archives whose deletion the inventory confirms.
    pub confirmed: Vec<String>,
    pub report: ReconcileReport,
}

/// Plan the merge of `inventory` into the cached rows of its vault.
///
/// `existing` must hold every cached row of the vault, tombstones included.
/// `now` becomes `created_here` for archives first learned from the inventory.
pub fn plan(
    account_key: &str,
    existing: &[ArchiveRow],
    inventory: &Inventory,
    fix: bool,
    now: OffsetDateTime,
) -> ReconcilePlan {
    let seen_at = inventory.effective_seen_time();
    let mut cached: HashMap<&str, ArchiveRow> = existing
        .iter()
        .map(|row| (row.id.as_str(), row.clone()))
        .collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(inventory.entries.len());
    let mut out = ReconcilePlan::default();

    for entry in &inventory.entries {
        if !seen.insert(entry.id.as_str()) {
            continue;
        }

        let Some(mut row) = cached.remove(entry.id.as_str()) else {
            out.upserts.push(ArchiveRow {
                account_key: account_key.to_string(),
                vault: inventory.vault.clone(),
                id: entry.id.clone(),
                name: entry.name.clone(),
                last_seen_upstream: Some(seen_at),
                created_here: now,
                deleted_here: None,
            });
            out.report.inserted += 1;
            continue;
        };

        match (&row.name, &entry.name) {
            (None, Some(_)) => row.name = entry.name.clone(),
            (Some(from), Some(to)) if from != to => {
                out.report.warnings.push(Inconsistency::Renamed {
                    id: row.id.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    fixed: fix,
                });
                if fix {
                    row.name = entry.name.clone();
                }
            }
            _ => {}
        }

        if let Some(deleted) = row.deleted_here {
            let archive = row.reference();
            out.report.warnings.push(if deleted < inventory.inventory_date {
                Inconsistency::DeletionRejected { archive }
            } else {
                Inconsistency::DeletionPending { archive }
            });
        }

        row.last_seen_upstream = Some(seen_at);
        out.upserts.push(row);
        out.report.updated += 1;
    }

    // What is left in `cached` was not listed.
    let mut missing: Vec<ArchiveRow> = cached.into_values().collect();
    missing.sort_by(|a, b| a.id.cmp(&b.id));

    for row in missing {
        let archive = row.reference();
        match classify_missing(&row, inventory.inventory_date) {
            MissingVerdict::ConfirmedDeletion => {
                out.purges.push(row.id);
                out.confirmed.push(archive);
                out.report.purged += 1;
            }
            MissingVerdict::Disappeared => {
                if fix {
                    out.purges.push(row.id);
                    out.report.removed += 1;
                }
                out.report.warnings.push(Inconsistency::Disappeared {
                    archive,
                    removed: fix,
                });
            }
            MissingVerdict::NotYetInInventory => {
                out.report
                    .warnings
                    .push(Inconsistency::NotYetInInventory { archive });
            }
        }
    }

    out
}

/// Merges inventories into the cache for one account and region.
pub struct Reconciler<'a, S: CacheStore + ?Sized> {
    store: &'a S,
    account_key: &'a str,
    region: &'a str,
}

impl<'a, S: CacheStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S, account_key: &'a str, region: &'a str) -> Self {
        Self {
            store,
            account_key,
            region,
        }
    }

    /// Run one pass. Either every write lands, including the vault's sync
    /// time, or none does.
    pub async fn reconcile(
        &self,
        inventory: &Inventory,
        fix: bool,
        now: OffsetDateTime,
    ) -> MetadataResult<ReconcileReport> {
        let vault = inventory.vault.as_str();
        let tx = self.store.begin().await?;

        let existing = tx.list_all_archives(self.account_key, vault).await?;
        let plan = plan(self.account_key, &existing, inventory, fix, now);

        for row in &plan.upserts {
            tx.upsert_on_reconcile(row).await?;
        }
        for id in &plan.purges {
            tx.delete_archive_record(self.account_key, vault, id).await?;
        }
        tx.record_vault_sync(
            self.account_key,
            vault,
            self.region,
            inventory.job_creation_time,
        )
        .await?;
        tx.commit().await?;

        for archive in &plan.confirmed {
            info!(
                vault = %vault,
                archive = %archive,
                "deleted archive has left inventory; removed from cache"
            );
        }
        let report = plan.report;
        for warning in &report.warnings {
            warn!(vault = %vault, archive = %warning.archive(), "{warning}");
        }
        info!(
            vault = %vault,
            inserted = report.inserted,
            updated = report.updated,
            purged = report.purged,
            removed = report.removed,
            "reconciled inventory"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-15 12:00 UTC);

    fn cached(id: &str, name: &str) -> ArchiveRow {
        ArchiveRow::uploaded("acct", "v", id, name, NOW - Duration::days(30))
    }

    fn inventory(entries: &[(&str, &str)], inventory_date: OffsetDateTime) -> Inventory {
        Inventory {
            vault: "v".to_string(),
            inventory_date,
            job_creation_time: inventory_date,
            entries: entries
                .iter()
                .map(|(id, name)| InventoryEntry {
                    id: id.to_string(),
                    name: Some(name.to_string()),
                    creation_date: inventory_date - Duration::days(60),
                })
                .collect(),
        }
    }

    #[test]
    fn test_effective_seen_time_bounds() {
        let mut inv = inventory(&[], NOW - Duration::days(10));
        inv.job_creation_time = NOW;
        assert_eq!(inv.effective_seen_time(), NOW - INVENTORY_LAG);

        inv.inventory_date = NOW - Duration::days(1);
        assert_eq!(inv.effective_seen_time(), NOW - Duration::days(1));

        for days in [0, 2, 3, 4, 30] {
            inv.inventory_date = NOW - Duration::days(days);
            let seen = inv.effective_seen_time();
            assert!(seen >= inv.inventory_date);
            assert!(seen >= inv.job_creation_time - INVENTORY_LAG);
        }
    }

    #[test]
    fn test_new_entry_is_inserted_as_seen() {
        let inv = inventory(&[("a1", "photos")], NOW - Duration::days(1));
        let plan = plan("acct", &[], &inv, false, NOW);

        assert_eq!(plan.report.inserted, 1);
        let row = &plan.upserts[0];
        assert_eq!(row.name.as_deref(), Some("photos"));
        assert_eq!(row.last_seen_upstream, Some(NOW - Duration::days(1)));
        assert_eq!(row.created_here, NOW);
        assert!(plan.report.warnings.is_empty());
    }

    #[test]
    fn test_rename_warns_and_only_fix_adopts() {
        let existing = [cached("a1", "old")];
        let inv = inventory(&[("a1", "new")], NOW - Duration::days(1));

        let dry = plan("acct", &existing, &inv, false, NOW);
        assert_eq!(dry.upserts[0].name.as_deref(), Some("old"));
        assert!(matches!(
            dry.report.warnings[0],
            Inconsistency::Renamed { fixed: false, .. }
        ));

        let fixed = plan("acct", &existing, &inv, true, NOW);
        assert_eq!(fixed.upserts[0].name.as_deref(), Some("new"));
        assert!(matches!(
            fixed.report.warnings[0],
            Inconsistency::Renamed { fixed: true, .. }
        ));
    }

    #[test]
    fn test_unnamed_record_adopts_upstream_name_silently() {
        let mut row = cached("a1", "x");
        row.name = None;
        let inv = inventory(&[("a1", "named")], NOW - Duration::days(1));

        let plan = plan("acct", &[row], &inv, false, NOW);
        assert_eq!(plan.upserts[0].name.as_deref(), Some("named"));
        assert!(plan.report.warnings.is_empty());
    }

    #[test]
    fn test_listed_tombstone_warns_and_is_kept() {
        let inv_date = NOW - Duration::days(1);
        let mut rejected = cached("a1", "one");
        rejected.deleted_here = Some(inv_date - Duration::hours(1));
        let mut pending = cached("a2", "two");
        pending.deleted_here = Some(inv_date + Duration::hours(1));
        let inv = inventory(&[("a1", "one"), ("a2", "two")], inv_date);

        let plan = plan("acct", &[rejected, pending], &inv, true, NOW);
        assert!(plan.purges.is_empty());
        assert_eq!(plan.upserts.len(), 2);
        assert!(plan
            .upserts
            .iter()
            .all(|r| r.last_seen_upstream == Some(inv_date)));
        assert_eq!(
            plan.report.warnings,
            vec![
                Inconsistency::DeletionRejected {
                    archive: "one".to_string()
                },
                Inconsistency::DeletionPending {
                    archive: "two".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_tombstone_purged_only_when_older_than_inventory() {
        let inv_date = NOW - Duration::days(1);
        let mut confirmed = cached("a1", "one");
        confirmed.deleted_here = Some(inv_date - Duration::seconds(1));
        let mut not_yet = cached("a2", "two");
        not_yet.deleted_here = Some(inv_date);
        let inv = inventory(&[], inv_date);

        let plan = plan("acct", &[confirmed, not_yet], &inv, true, NOW);
        assert_eq!(plan.purges, vec!["a1".to_string()]);
        assert_eq!(plan.confirmed, vec!["one".to_string()]);
        assert_eq!(plan.report.purged, 1);
        assert_eq!(
            plan.report.warnings,
            vec![Inconsistency::NotYetInInventory {
                archive: "two".to_string()
            }]
        );
    }

    #[test]
    fn test_stale_snapshot_flags_old_unconfirmed_archive() {
        let inv_date = NOW - Duration::days(1);
        let mut x = cached("x", "X");
        x.created_here = NOW - Duration::days(10);
        let inv = inventory(&[], inv_date);

        let dry = plan("acct", std::slice::from_ref(&x), &inv, false, NOW);
        assert!(dry.purges.is_empty());
        assert_eq!(
            dry.report.warnings,
            vec![Inconsistency::Disappeared {
                archive: "X".to_string(),
                removed: false
            }]
        );

        let fixed = plan("acct", &[x], &inv, true, NOW);
        assert_eq!(fixed.purges, vec!["x".to_string()]);
        assert_eq!(fixed.report.removed, 1);
    }

    #[test]
    fn test_recent_unconfirmed_archive_is_left_alone() {
        let inv_date = NOW - Duration::days(1);
        let mut fresh = cached("f", "fresh");
        fresh.created_here = NOW - Duration::days(2);
        let inv = inventory(&[], inv_date);

        let plan = plan("acct", &[fresh], &inv, true, NOW);
        assert!(plan.purges.is_empty());
        assert_eq!(
            plan.report.warnings,
            vec![Inconsistency::NotYetInInventory {
                archive: "fresh".to_string()
            }]
        );
    }

    #[test]
    fn test_previously_seen_archive_disappears_regardless_of_age() {
        let inv_date = NOW - Duration::days(1);
        let mut seen = cached("s", "seen");
        seen.created_here = NOW - Duration::hours(1);
        seen.last_seen_upstream = Some(NOW - Duration::hours(1));

        assert_eq!(
            classify_missing(&seen, inv_date),
            MissingVerdict::Disappeared
        );
    }

    #[test]
    fn test_warning_display() {
        let w = Inconsistency::Disappeared {
            archive: "photos".to_string(),
            removed: true,
        };
        assert_eq!(
            w.to_string(),
            "archive disappeared: \"photos\" (removed from cache)"
        );
        let w = Inconsistency::NotYetInInventory {
            archive: "id:abc".to_string(),
        };
        assert_eq!(w.to_string(), "new archive not yet in inventory: \"id:abc\"");
    }
}
