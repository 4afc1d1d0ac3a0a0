//! Job coordination tests: dedup, retry signalling and bounded waits.

mod common;

use common::{Harness, VAULT};
use icebox_engine::{
    ErrorKind, JobCoordinator, JobQuery, OpError, RetrieveOptions, SyncOptions, list_jobs,
    retrieve_archives, sync_vault,
};
use icebox_remote::ArchiveStore;
use std::time::Duration;

fn retrieve_to(path: &std::path::Path) -> RetrieveOptions {
    RetrieveOptions {
        wait: false,
        output: Some(path.display().to_string()),
        multipart_size: icebox_core::DEFAULT_MULTIPART_SIZE,
    }
}

#[tokio::test]
async fn test_pending_inventory_is_not_requested_twice() {
    let h = Harness::new().await;
    h.remote.request_inventory_job(VAULT).await.unwrap();

    let err = sync_vault(&h.session, VAULT, SyncOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Retryable);
    assert_eq!(err.exit_code(), 75);
    assert_eq!(err.to_string(), "job still pending for inventory on \"photos\"");
    assert_eq!(h.remote.inventory_requests(), 1);
}

#[tokio::test]
async fn test_sync_without_job_queues_one() {
    let h = Harness::new().await;

    let err = sync_vault(&h.session, VAULT, SyncOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "queued inventory job for \"photos\"");

    let err = sync_vault(&h.session, VAULT, SyncOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "job still pending for inventory on \"photos\"");
    assert_eq!(h.remote.inventory_requests(), 1);
}

#[tokio::test]
async fn test_retrieval_without_job_queues_exactly_one() {
    let h = Harness::new().await;
    let archive_id = h.seed_archive("Z", b"zzz").await;
    let out = tempfile::tempdir().unwrap();
    let options = retrieve_to(&out.path().join("z.out"));

    let err = retrieve_archives(&h.session, VAULT, &["Z".to_string()], &options)
        .await
        .unwrap_err();
    match &err {
        OpError::Retryable(messages) => {
            assert_eq!(messages, &["queued retrieval job for archive \"Z\""]);
        }
        other => panic!("expected retryable, got {other:?}"),
    }
    assert_eq!(h.remote.retrieval_requests(), 1);

    let jobs = h.remote.list_jobs(VAULT).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].archive_id.as_deref(), Some(archive_id.as_str()));

    let err = retrieve_archives(&h.session, VAULT, &["Z".to_string()], &options)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "job still pending for archive \"Z\"");
    assert_eq!(h.remote.retrieval_requests(), 1);
    assert!(!out.path().join("z.out").exists());
}

#[tokio::test]
async fn test_retrieval_is_charged_against_budget() {
    let h = Harness::new().await;
    h.seed_archive("Z", b"0123456789").await;
    let out = tempfile::tempdir().unwrap();

    let _ = retrieve_archives(
        &h.session,
        VAULT,
        &["Z".to_string()],
        &retrieve_to(&out.path().join("z.out")),
    )
    .await;

    let config = h.config.current();
    assert_eq!(config.retrieval.consumed_bytes, 10);
    assert!(config.retrieval.last_reset.is_some());
}

#[tokio::test]
async fn test_exhausted_free_tier_refuses_new_retrieval() {
    let mut config = icebox_core::IceboxConfig::for_testing();
    config.retrieval.free_tier_only = true;
    config.retrieval.daily_free_bytes = 100;
    config.retrieval.consumed_bytes = 100;
    config.retrieval.last_reset = Some(time::OffsetDateTime::now_utc());
    let h = Harness::with_config(config).await;
    h.seed_archive("Z", b"zzz").await;
    let out = tempfile::tempdir().unwrap();

    let err = retrieve_archives(
        &h.session,
        VAULT,
        &["Z".to_string()],
        &retrieve_to(&out.path().join("z.out")),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, OpError::PolicyRefused(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.remote.retrieval_requests(), 0);
}

#[tokio::test]
async fn test_wait_times_out() {
    let h = Harness::new().await;
    h.remote.request_inventory_job(VAULT).await.unwrap();

    let options = SyncOptions {
        wait: true,
        ..SyncOptions::default()
    };
    let err = sync_vault(&h.session, VAULT, options).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_wait_stops_on_cancel() {
    let h = Harness::new().await.with_wait(Duration::from_secs(60), 10);
    h.remote.request_inventory_job(VAULT).await.unwrap();
    h.session.cancel_token().cancel();

    let options = SyncOptions {
        wait: true,
        ..SyncOptions::default()
    };
    let err = sync_vault(&h.session, VAULT, options).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.exit_code(), 130);
}

#[tokio::test]
async fn test_wait_ends_when_every_job_fails() {
    let h = Harness::new()
        .await
        .with_wait(Duration::from_millis(10), 500);
    let job = h.remote.request_inventory_job(VAULT).await.unwrap();

    let remote = h.remote.clone();
    let failer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        remote.fail_job(VAULT, &job.id).await.unwrap();
    });

    let query = JobQuery::inventory(VAULT, None);
    let err = JobCoordinator::new(&h.session)
        .get_or_create(VAULT, &query, true)
        .await
        .unwrap_err();
    failer.await.unwrap();

    assert!(matches!(err, OpError::JobFailed(_)));
    assert_eq!(h.remote.inventory_requests(), 1);
}

#[tokio::test]
async fn test_wait_returns_completed_job() {
    let h = Harness::new()
        .await
        .with_wait(Duration::from_millis(10), 500);
    let job = h.remote.request_inventory_job(VAULT).await.unwrap();

    let remote = h.remote.clone();
    let job_id = job.id.clone();
    let completer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        remote.complete_job(VAULT, &job_id).await.unwrap();
    });

    let query = JobQuery::inventory(VAULT, None);
    let done = JobCoordinator::new(&h.session)
        .get_or_create(VAULT, &query, true)
        .await
        .unwrap();
    completer.await.unwrap();

    assert_eq!(done.id, job.id);
    assert!(done.is_succeeded());
}

#[tokio::test]
async fn test_failed_job_is_never_reused() {
    let h = Harness::new().await;
    let failed = h.remote.request_inventory_job(VAULT).await.unwrap();
    h.remote.fail_job(VAULT, &failed.id).await.unwrap();

    let query = JobQuery::inventory(VAULT, Some(time::Duration::hours(24)));
    let err = JobCoordinator::new(&h.session)
        .get_or_create(VAULT, &query, false)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "queued inventory job for \"photos\"");
    assert_eq!(h.remote.inventory_requests(), 2);
}

#[tokio::test]
async fn test_job_list_names_cached_archives() {
    let h = Harness::new().await;
    let id = h.seed_archive("Z", b"zzz").await;
    h.remote
        .request_archive_retrieval_job(VAULT, &id)
        .await
        .unwrap();
    h.remote.request_inventory_job(VAULT).await.unwrap();

    let lines = list_jobs(&h.session).await.unwrap();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("a/p "), "{}", lines[0]);
    assert!(lines[0].ends_with(" photos     Z"), "{}", lines[0]);
    assert!(lines[1].starts_with("i/p "), "{}", lines[1]);
}
