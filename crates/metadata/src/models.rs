//! Database models mapping to the cache schema.

use icebox_core::ArchiveRef;
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Vaults
// =============================================================================

/// Cached vault record, keyed by `(account_key, name, region)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct VaultRow {
    pub account_key: String,
    pub name: String,
    pub region: String,
    pub cached_size: i64,
    pub last_synced_at: Option<OffsetDateTime>,
}

impl VaultRow {
    /// A vault seen for the first time.
    pub fn new(
        account_key: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            account_key: account_key.into(),
            name: name.into(),
            region: region.into(),
            cached_size: 0,
            last_synced_at: None,
        }
    }
}

// =============================================================================
// Archives
// =============================================================================

/// Cached archive record, keyed by `(account_key, vault, id)`.
///
/// `created_here` is written once. `deleted_here` is a local tombstone that
/// survives until an inventory dated after it confirms the archive is gone.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ArchiveRow {
    pub account_key: String,
    pub vault: String,
    pub id: String,
    pub name: Option<String>,
    pub last_seen_upstream: Option<OffsetDateTime>,
    pub created_here: OffsetDateTime,
    pub deleted_here: Option<OffsetDateTime>,
}

impl ArchiveRow {
    /// A freshly uploaded archive, not yet confirmed upstream.
    pub fn uploaded(
        account_key: impl Into<String>,
        vault: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        created_here: OffsetDateTime,
    ) -> Self {
        Self {
            account_key: account_key.into(),
            vault: vault.into(),
            id: id.into(),
            name: Some(name.into()),
            last_seen_upstream: None,
            created_here,
            deleted_here: None,
        }
    }

    /// Whether a local delete is waiting for upstream confirmation.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_here.is_some()
    }

    /// The latest time the archive is known to have existed.
    pub fn last_seen(&self) -> OffsetDateTime {
        self.last_seen_upstream.unwrap_or(self.created_here)
    }

    /// The shortest reference that identifies this archive on its own.
    pub fn reference(&self) -> String {
        ArchiveRef::render(self.name.as_deref(), &self.id, false)
    }
}
