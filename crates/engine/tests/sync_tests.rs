//! Vault operations and end-to-end sync against the in-memory store.

mod common;

use common::{ACCOUNT, Harness, REGION, VAULT};
use icebox_engine::{
    ErrorKind, OpError, SyncOptions, create_vault, delete_vault, list_archives, list_vaults,
    sync_vault,
};
use icebox_metadata::repos::{ArchiveRepo, VaultRepo};
use icebox_remote::{ArchiveStore, RemoteError};

fn waiting() -> SyncOptions {
    SyncOptions {
        wait: true,
        ..SyncOptions::default()
    }
}

#[tokio::test]
async fn test_sync_imports_archives_uploaded_elsewhere() {
    let h = Harness::auto_complete().await;
    let beach = h.upload_elsewhere("beach.tar", b"sand").await;
    h.upload_elsewhere("", b"anonymous").await;

    let report = sync_vault(&h.session, VAULT, waiting()).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert!(report.warnings.is_empty());

    let listing = list_archives(&h.session, VAULT).await.unwrap();
    assert!(listing.last_synced.is_some());
    assert!(listing.last_inventory.is_some());
    let refs: Vec<&str> = listing
        .entries
        .iter()
        .map(|e| e.reference.as_str())
        .collect();
    assert!(refs.contains(&"beach.tar"));
    assert!(refs.iter().any(|r| r.starts_with("id:")));

    let row = h
        .cache
        .get_archive(ACCOUNT, VAULT, &beach)
        .await
        .unwrap()
        .unwrap();
    assert!(row.last_seen_upstream.is_some());
}

#[tokio::test]
async fn test_second_sync_reuses_recent_inventory() {
    let h = Harness::auto_complete().await;
    h.upload_elsewhere("beach.tar", b"sand").await;

    sync_vault(&h.session, VAULT, waiting()).await.unwrap();
    let report = sync_vault(&h.session, VAULT, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(h.remote.inventory_requests(), 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 1);
}

#[tokio::test]
async fn test_sync_confirms_local_delete() {
    let h = Harness::auto_complete().await;
    let id = h.seed_archive("old.tar", b"old").await;
    icebox_engine::delete_archive(&h.session, VAULT, "old.tar")
        .await
        .unwrap();
    assert!(
        h.cache
            .get_archive(ACCOUNT, VAULT, &id)
            .await
            .unwrap()
            .unwrap()
            .is_tombstoned()
    );

    // The inventory must be dated after the tombstone.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let report = sync_vault(&h.session, VAULT, waiting()).await.unwrap();

    assert_eq!(report.purged, 1);
    assert!(
        h.cache
            .get_archive(ACCOUNT, VAULT, &id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_sync_of_missing_vault_fails() {
    let h = Harness::auto_complete().await;

    let err = sync_vault(&h.session, "nope", waiting()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.remote.inventory_requests(), 0);
}

#[tokio::test]
async fn test_vault_list_drops_vaults_gone_remotely() {
    let h = Harness::new().await;
    create_vault(&h.session, "music").await.unwrap();
    create_vault(&h.session, "scratch").await.unwrap();
    h.remote.delete_vault("scratch").await.unwrap();

    let names = list_vaults(&h.session).await.unwrap();

    assert_eq!(names, vec!["music".to_string(), "photos".to_string()]);
    assert!(
        h.cache
            .get_vault(ACCOUNT, "scratch", REGION)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_vault_list_records_size() {
    let h = Harness::new().await;
    h.upload_elsewhere("a", b"12345").await;

    list_vaults(&h.session).await.unwrap();

    let row = h
        .cache
        .get_vault(ACCOUNT, VAULT, REGION)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.cached_size, 5);
}

#[tokio::test]
async fn test_delete_non_empty_vault_is_a_hard_failure() {
    let h = Harness::new().await;
    h.seed_archive("a", b"x").await;
    list_vaults(&h.session).await.unwrap();

    let err = delete_vault(&h.session, VAULT).await.unwrap_err();

    assert!(matches!(
        err,
        OpError::Remote(RemoteError::VaultNotEmpty(_))
    ));
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(
        h.cache
            .get_vault(ACCOUNT, VAULT, REGION)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_delete_empty_vault() {
    let h = Harness::new().await;
    create_vault(&h.session, "music").await.unwrap();

    delete_vault(&h.session, "music").await.unwrap();

    assert!(
        h.cache
            .get_vault(ACCOUNT, "music", REGION)
            .await
            .unwrap()
            .is_none()
    );
    assert!(h.remote.describe_vault("music").await.is_err());
}
