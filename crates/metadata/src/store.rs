//! Cache store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{ArchiveRow, VaultRow};
use crate::repos::{ArchiveRepo, VaultRepo};
use async_trait::async_trait;
use icebox_core::ArchiveRef;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Combined cache store trait.
#[async_trait]
pub trait CacheStore: VaultRepo + ArchiveRepo + Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Open a transaction. Writes through it become visible on commit only.
    async fn begin(&self) -> MetadataResult<CacheTransaction>;
}

/// SQLite-based cache store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the cache database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Another invocation may hold the write lock briefly.
            .busy_timeout(Duration::from_secs(5));

        let pool = Self::pool_options().connect_with(opts).await?;
        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened cache database");
        Ok(store)
    }

    /// Create a private in-memory store.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = Self::pool_options()
            // The database lives only as long as its single connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    fn pool_options() -> SqlitePoolOptions {
        // One connection: a command runs a single control flow, and an open
        // reconciliation pass must be the only writer.
        SqlitePoolOptions::new().max_connections(1)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> MetadataResult<CacheTransaction> {
        let tx = self.pool.begin().await?;
        Ok(CacheTransaction { tx: Mutex::new(tx) })
    }
}

/// An open cache transaction.
///
/// Implements the same repositories as the store. Dropping it without
/// calling [`CacheTransaction::commit`] rolls every write back.
pub struct CacheTransaction {
    tx: Mutex<Transaction<'static, Sqlite>>,
}

impl CacheTransaction {
    /// Commit all writes made through this transaction.
    pub async fn commit(self) -> MetadataResult<()> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }

    /// Discard all writes made through this transaction.
    pub async fn rollback(self) -> MetadataResult<()> {
        self.tx.into_inner().rollback().await?;
        Ok(())
    }
}

const VAULT_COLUMNS: &str = "account_key, name, region, cached_size, last_synced_at";
const ARCHIVE_COLUMNS: &str =
    "account_key, vault, id, name, last_seen_upstream, created_here, deleted_here";

/// SQL shared by the pool-backed store and open transactions.
mod queries {
    use super::*;
    use sqlx::Executor;

    pub(super) async fn upsert_vault<'c, E>(exec: E, vault: &VaultRow) -> MetadataResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO vaults (account_key, name, region, cached_size, last_synced_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (account_key, name, region) DO UPDATE SET
                cached_size = excluded.cached_size,
                last_synced_at = COALESCE(excluded.last_synced_at, vaults.last_synced_at)
            "#,
        )
        .bind(&vault.account_key)
        .bind(&vault.name)
        .bind(&vault.region)
        .bind(vault.cached_size)
        .bind(vault.last_synced_at)
        .execute(exec)
        .await?;
        Ok(())
    }

    pub(super) async fn get_vault<'c, E>(
        exec: E,
        account_key: &str,
        name: &str,
        region: &str,
    ) -> MetadataResult<Option<VaultRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {VAULT_COLUMNS} FROM vaults WHERE account_key = ? AND name = ? AND region = ?"
        );
        let row = sqlx::query_as::<_, VaultRow>(&sql)
            .bind(account_key)
            .bind(name)
            .bind(region)
            .fetch_optional(exec)
            .await?;
        Ok(row)
    }

    pub(super) async fn list_vaults<'c, E>(
        exec: E,
        account_key: &str,
        region: &str,
    ) -> MetadataResult<Vec<VaultRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {VAULT_COLUMNS} FROM vaults WHERE account_key = ? AND region = ? ORDER BY name"
        );
        let rows = sqlx::query_as::<_, VaultRow>(&sql)
            .bind(account_key)
            .bind(region)
            .fetch_all(exec)
            .await?;
        Ok(rows)
    }

    pub(super) async fn delete_vault<'c, E>(
        exec: E,
        account_key: &str,
        name: &str,
        region: &str,
    ) -> MetadataResult<bool>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result =
            sqlx::query("DELETE FROM vaults WHERE account_key = ? AND name = ? AND region = ?")
                .bind(account_key)
                .bind(name)
                .bind(region)
                .execute(exec)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn record_vault_sync<'c, E>(
        exec: E,
        account_key: &str,
        name: &str,
        region: &str,
        synced_at: OffsetDateTime,
    ) -> MetadataResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO vaults (account_key, name, region, cached_size, last_synced_at)
            VALUES (?, ?, ?, 0, ?)
            ON CONFLICT (account_key, name, region) DO UPDATE SET
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(account_key)
        .bind(name)
        .bind(region)
        .bind(synced_at)
        .execute(exec)
        .await?;
        Ok(())
    }

    pub(super) async fn insert_archive<'c, E>(exec: E, archive: &ArchiveRow) -> MetadataResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO archives (
                account_key, vault, id, name, last_seen_upstream, created_here, deleted_here
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&archive.account_key)
        .bind(&archive.vault)
        .bind(&archive.id)
        .bind(&archive.name)
        .bind(archive.last_seen_upstream)
        .bind(archive.created_here)
        .bind(archive.deleted_here)
        .execute(exec)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(MetadataError::AlreadyExists(format!(
                    "archive id:{} in vault {}",
                    archive.id, archive.vault
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn get_archive<'c, E>(
        exec: E,
        account_key: &str,
        vault: &str,
        id: &str,
    ) -> MetadataResult<Option<ArchiveRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM archives WHERE account_key = ? AND vault = ? AND id = ?"
        );
        let row = sqlx::query_as::<_, ArchiveRow>(&sql)
            .bind(account_key)
            .bind(vault)
            .bind(id)
            .fetch_optional(exec)
            .await?;
        Ok(row)
    }

    pub(super) async fn find_archive_by_ref<'c, E>(
        exec: E,
        account_key: &str,
        vault: &str,
        reference: &ArchiveRef,
    ) -> MetadataResult<ArchiveRow>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let column = match reference {
            ArchiveRef::Id(_) => "id",
            ArchiveRef::Name(_) => "name",
        };
        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM archives \
             WHERE account_key = ? AND vault = ? AND deleted_here IS NULL AND {column} = ?"
        );
        let mut rows = sqlx::query_as::<_, ArchiveRow>(&sql)
            .bind(account_key)
            .bind(vault)
            .bind(reference.value())
            .fetch_all(exec)
            .await?;

        if rows.len() > 1 {
            return Err(MetadataError::Ambiguous {
                reference: reference.to_string(),
                matches: rows.len(),
            });
        }
        rows.pop().ok_or_else(|| {
            MetadataError::NotFound(format!("archive {reference} in vault {vault}"))
        })
    }

    pub(super) async fn list_archives<'c, E>(
        exec: E,
        account_key: &str,
        vault: &str,
        include_tombstoned: bool,
    ) -> MetadataResult<Vec<ArchiveRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let live_filter = if include_tombstoned {
            ""
        } else {
            " AND deleted_here IS NULL"
        };
        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM archives \
             WHERE account_key = ? AND vault = ?{live_filter} ORDER BY name, id"
        );
        let rows = sqlx::query_as::<_, ArchiveRow>(&sql)
            .bind(account_key)
            .bind(vault)
            .fetch_all(exec)
            .await?;
        Ok(rows)
    }

    pub(super) async fn mark_archive_deleted<'c, E>(
        exec: E,
        account_key: &str,
        vault: &str,
        id: &str,
        deleted_at: OffsetDateTime,
    ) -> MetadataResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE archives SET deleted_here = ? WHERE account_key = ? AND vault = ? AND id = ?",
        )
        .bind(deleted_at)
        .bind(account_key)
        .bind(vault)
        .bind(id)
        .execute(exec)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "archive id:{id} in vault {vault}"
            )));
        }
        Ok(())
    }

    pub(super) async fn upsert_on_reconcile<'c, E>(
        exec: E,
        archive: &ArchiveRow,
    ) -> MetadataResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO archives (
                account_key, vault, id, name, last_seen_upstream, created_here, deleted_here
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_key, vault, id) DO UPDATE SET
                name = excluded.name,
                last_seen_upstream = excluded.last_seen_upstream
            "#,
        )
        .bind(&archive.account_key)
        .bind(&archive.vault)
        .bind(&archive.id)
        .bind(&archive.name)
        .bind(archive.last_seen_upstream)
        .bind(archive.created_here)
        .bind(archive.deleted_here)
        .execute(exec)
        .await?;
        Ok(())
    }

    pub(super) async fn delete_archive_record<'c, E>(
        exec: E,
        account_key: &str,
        vault: &str,
        id: &str,
    ) -> MetadataResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM archives WHERE account_key = ? AND vault = ? AND id = ?")
            .bind(account_key)
            .bind(vault)
            .bind(id)
            .execute(exec)
            .await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;

    #[async_trait]
    impl VaultRepo for SqliteStore {
        async fn upsert_vault(&self, vault: &VaultRow) -> MetadataResult<()> {
            queries::upsert_vault(&self.pool, vault).await
        }

        async fn get_vault(
            &self,
            account_key: &str,
            name: &str,
            region: &str,
        ) -> MetadataResult<Option<VaultRow>> {
            queries::get_vault(&self.pool, account_key, name, region).await
        }

        async fn list_vaults(
            &self,
            account_key: &str,
            region: &str,
        ) -> MetadataResult<Vec<VaultRow>> {
            queries::list_vaults(&self.pool, account_key, region).await
        }

        async fn delete_vault(
            &self,
            account_key: &str,
            name: &str,
            region: &str,
        ) -> MetadataResult<bool> {
            queries::delete_vault(&self.pool, account_key, name, region).await
        }

        async fn record_vault_sync(
            &self,
            account_key: &str,
            name: &str,
            region: &str,
            synced_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            queries::record_vault_sync(&self.pool, account_key, name, region, synced_at).await
        }
    }

    #[async_trait]
    impl ArchiveRepo for SqliteStore {
        async fn insert_archive(&self, archive: &ArchiveRow) -> MetadataResult<()> {
            queries::insert_archive(&self.pool, archive).await
        }

        async fn get_archive(
            &self,
            account_key: &str,
            vault: &str,
            id: &str,
        ) -> MetadataResult<Option<ArchiveRow>> {
            queries::get_archive(&self.pool, account_key, vault, id).await
        }

        async fn find_archive_by_ref(
            &self,
            account_key: &str,
            vault: &str,
            reference: &ArchiveRef,
        ) -> MetadataResult<ArchiveRow> {
            queries::find_archive_by_ref(&self.pool, account_key, vault, reference).await
        }

        async fn list_archives(
            &self,
            account_key: &str,
            vault: &str,
        ) -> MetadataResult<Vec<ArchiveRow>> {
            queries::list_archives(&self.pool, account_key, vault, false).await
        }

        async fn list_all_archives(
            &self,
            account_key: &str,
            vault: &str,
        ) -> MetadataResult<Vec<ArchiveRow>> {
            queries::list_archives(&self.pool, account_key, vault, true).await
        }

        async fn mark_archive_deleted(
            &self,
            account_key: &str,
            vault: &str,
            id: &str,
            deleted_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            queries::mark_archive_deleted(&self.pool, account_key, vault, id, deleted_at).await
        }

        async fn upsert_on_reconcile(&self, archive: &ArchiveRow) -> MetadataResult<()> {
            queries::upsert_on_reconcile(&self.pool, archive).await
        }

        async fn delete_archive_record(
            &self,
            account_key: &str,
            vault: &str,
            id: &str,
        ) -> MetadataResult<()> {
            queries::delete_archive_record(&self.pool, account_key, vault, id).await
        }
    }
}

mod transaction_impl {
    use super::*;

    #[async_trait]
    impl VaultRepo for CacheTransaction {
        async fn upsert_vault(&self, vault: &VaultRow) -> MetadataResult<()> {
            let mut tx = self.tx.lock().await;
            queries::upsert_vault(&mut **tx, vault).await
        }

        async fn get_vault(
            &self,
            account_key: &str,
            name: &str,
            region: &str,
        ) -> MetadataResult<Option<VaultRow>> {
            let mut tx = self.tx.lock().await;
            queries::get_vault(&mut **tx, account_key, name, region).await
        }

        async fn list_vaults(
            &self,
            account_key: &str,
            region: &str,
        ) -> MetadataResult<Vec<VaultRow>> {
            let mut tx = self.tx.lock().await;
            queries::list_vaults(&mut **tx, account_key, region).await
        }

        async fn delete_vault(
            &self,
            account_key: &str,
            name: &str,
            region: &str,
        ) -> MetadataResult<bool> {
            let mut tx = self.tx.lock().await;
            queries::delete_vault(&mut **tx, account_key, name, region).await
        }

        async fn record_vault_sync(
            &self,
            account_key: &str,
            name: &str,
            region: &str,
            synced_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let mut tx = self.tx.lock().await;
            queries::record_vault_sync(&mut **tx, account_key, name, region, synced_at).await
        }
    }

    #[async_trait]
    impl ArchiveRepo for CacheTransaction {
        async fn insert_archive(&self, archive: &ArchiveRow) -> MetadataResult<()> {
            let mut tx = self.tx.lock().await;
            queries::insert_archive(&mut **tx, archive).await
        }

        async fn get_archive(
            &self,
            account_key: &str,
            vault: &str,
            id: &str,
        ) -> MetadataResult<Option<ArchiveRow>> {
            let mut tx = self.tx.lock().await;
            queries::get_archive(&mut **tx, account_key, vault, id).await
        }

        async fn find_archive_by_ref(
            &self,
            account_key: &str,
            vault: &str,
            reference: &ArchiveRef,
        ) -> MetadataResult<ArchiveRow> {
            let mut tx = self.tx.lock().await;
            queries::find_archive_by_ref(&mut **tx, account_key, vault, reference).await
        }

        async fn list_archives(
            &self,
            account_key: &str,
            vault: &str,
        ) -> MetadataResult<Vec<ArchiveRow>> {
            let mut tx = self.tx.lock().await;
            queries::list_archives(&mut **tx, account_key, vault, false).await
        }

        async fn list_all_archives(
            &self,
            account_key: &str,
            vault: &str,
        ) -> MetadataResult<Vec<ArchiveRow>> {
            let mut tx = self.tx.lock().await;
            queries::list_archives(&mut **tx, account_key, vault, true).await
        }

        async fn mark_archive_deleted(
            &self,
            account_key: &str,
            vault: &str,
            id: &str,
            deleted_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let mut tx = self.tx.lock().await;
            queries::mark_archive_deleted(&mut **tx, account_key, vault, id, deleted_at).await
        }

        async fn upsert_on_reconcile(&self, archive: &ArchiveRow) -> MetadataResult<()> {
            let mut tx = self.tx.lock().await;
            queries::upsert_on_reconcile(&mut **tx, archive).await
        }

        async fn delete_archive_record(
            &self,
            account_key: &str,
            vault: &str,
            id: &str,
        ) -> MetadataResult<()> {
            let mut tx = self.tx.lock().await;
            queries::delete_archive_record(&mut **tx, account_key, vault, id).await
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Vaults, scoped by account key and region
CREATE TABLE IF NOT EXISTS vaults (
    account_key TEXT NOT NULL,
    name TEXT NOT NULL,
    region TEXT NOT NULL,
    cached_size INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    PRIMARY KEY (account_key, name, region)
);

-- Archives, scoped by account key and vault
CREATE TABLE IF NOT EXISTS archives (
    account_key TEXT NOT NULL,
    vault TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT,
    last_seen_upstream TEXT,
    created_here TEXT NOT NULL,
    deleted_here TEXT,
    PRIMARY KEY (account_key, vault, id)
);
CREATE INDEX IF NOT EXISTS idx_archives_name ON archives(account_key, vault, name);
"#;
