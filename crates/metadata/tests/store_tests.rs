//! Integration tests for the SQLite cache store.

mod common;

use common::{ACCOUNT, NOW, REGION, TestCache, VAULT, uploaded};
use icebox_core::ArchiveRef;
use icebox_metadata::models::VaultRow;
use icebox_metadata::repos::{ArchiveRepo, VaultRepo};
use icebox_metadata::resolver::{list_archive_refs, resolve};
use icebox_metadata::MetadataError;
use time::Duration;

#[tokio::test]
async fn test_vault_upsert_keeps_sync_time() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;

    store
        .record_vault_sync(ACCOUNT, VAULT, REGION, NOW)
        .await
        .unwrap();

    let mut row = VaultRow::new(ACCOUNT, VAULT, REGION);
    row.cached_size = 4096;
    store.upsert_vault(&row).await.unwrap();

    let vault = store
        .get_vault(ACCOUNT, VAULT, REGION)
        .await
        .unwrap()
        .expect("vault cached");
    assert_eq!(vault.cached_size, 4096);
    assert_eq!(vault.last_synced_at, Some(NOW));
}

#[tokio::test]
async fn test_vaults_are_scoped_by_account_and_region() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;

    for (account, name, region) in [
        (ACCOUNT, "b", REGION),
        (ACCOUNT, "a", REGION),
        (ACCOUNT, "c", "eu-west-1"),
        ("OTHER", "d", REGION),
    ] {
        store
            .upsert_vault(&VaultRow::new(account, name, region))
            .await
            .unwrap();
    }

    let names: Vec<String> = store
        .list_vaults(ACCOUNT, REGION)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    assert!(store.delete_vault(ACCOUNT, "a", REGION).await.unwrap());
    assert!(!store.delete_vault(ACCOUNT, "a", REGION).await.unwrap());
}

#[tokio::test]
async fn test_insert_duplicate_archive_fails() {
    let cache = TestCache::new().await.unwrap();
    let row = uploaded("a1", "one", Duration::hours(1));

    cache.store.insert_archive(&row).await.unwrap();
    let err = cache.store.insert_archive(&row).await.unwrap_err();
    assert!(matches!(err, MetadataError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_find_by_ref_distinguishes_missing_and_ambiguous() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;
    for row in [
        uploaded("a1", "dup", Duration::hours(3)),
        uploaded("a2", "dup", Duration::hours(2)),
        uploaded("a3", "solo", Duration::hours(1)),
    ] {
        store.insert_archive(&row).await.unwrap();
    }

    let found = resolve(store.as_ref(), ACCOUNT, VAULT, "solo").await.unwrap();
    assert_eq!(found.id, "a3");
    let found = resolve(store.as_ref(), ACCOUNT, VAULT, "id:a2").await.unwrap();
    assert_eq!(found.name.as_deref(), Some("dup"));

    let err = resolve(store.as_ref(), ACCOUNT, VAULT, "dup")
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::Ambiguous { matches: 2, .. }));

    let err = store
        .find_archive_by_ref(ACCOUNT, VAULT, &ArchiveRef::Name("none".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));
}

#[tokio::test]
async fn test_tombstoned_archives_are_hidden_from_lookups() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;
    store
        .insert_archive(&uploaded("a1", "gone", Duration::hours(1)))
        .await
        .unwrap();
    store
        .mark_archive_deleted(ACCOUNT, VAULT, "a1", NOW)
        .await
        .unwrap();

    assert!(store.list_archives(ACCOUNT, VAULT).await.unwrap().is_empty());
    assert_eq!(store.list_all_archives(ACCOUNT, VAULT).await.unwrap().len(), 1);
    let err = resolve(store.as_ref(), ACCOUNT, VAULT, "gone")
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));

    let row = store.get_archive(ACCOUNT, VAULT, "a1").await.unwrap().unwrap();
    assert_eq!(row.deleted_here, Some(NOW));
}

#[tokio::test]
async fn test_mark_deleted_unknown_archive_is_not_found() {
    let cache = TestCache::new().await.unwrap();
    let err = cache
        .store
        .mark_archive_deleted(ACCOUNT, VAULT, "missing", NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));
}

#[tokio::test]
async fn test_upsert_on_reconcile_preserves_local_fields() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;
    let original = uploaded("a1", "one", Duration::days(5));
    store.insert_archive(&original).await.unwrap();
    store
        .mark_archive_deleted(ACCOUNT, VAULT, "a1", NOW)
        .await
        .unwrap();

    let mut update = original.clone();
    update.name = Some("renamed".to_string());
    update.last_seen_upstream = Some(NOW - Duration::days(1));
    update.created_here = NOW;
    update.deleted_here = None;
    store.upsert_on_reconcile(&update).await.unwrap();

    let row = store.get_archive(ACCOUNT, VAULT, "a1").await.unwrap().unwrap();
    assert_eq!(row.name.as_deref(), Some("renamed"));
    assert_eq!(row.last_seen_upstream, Some(NOW - Duration::days(1)));
    assert_eq!(row.created_here, original.created_here);
    assert_eq!(row.deleted_here, Some(NOW));
}

#[tokio::test]
async fn test_listing_disambiguates_contested_names() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;
    for row in [
        uploaded("a2", "A", Duration::hours(1)),
        uploaded("b1", "B", Duration::hours(1)),
        uploaded("a1", "A", Duration::hours(1)),
    ] {
        store.insert_archive(&row).await.unwrap();
    }

    let refs: Vec<String> = list_archive_refs(store.as_ref(), ACCOUNT, VAULT)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.reference)
        .collect();
    assert_eq!(refs, vec!["id:a1", "id:a2", "B"]);

    // Every emitted token resolves back to exactly one archive.
    for token in &refs {
        resolve(store.as_ref(), ACCOUNT, VAULT, token).await.unwrap();
    }
}

#[tokio::test]
async fn test_delete_archive_record() {
    let cache = TestCache::new().await.unwrap();
    let store = &cache.store;
    store
        .insert_archive(&uploaded("a1", "one", Duration::hours(1)))
        .await
        .unwrap();
    store
        .delete_archive_record(ACCOUNT, VAULT, "a1")
        .await
        .unwrap();
    assert!(store.get_archive(ACCOUNT, VAULT, "a1").await.unwrap().is_none());
}
