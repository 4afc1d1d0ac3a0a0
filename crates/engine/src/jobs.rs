//! Job coordination.
//!
//! Remote jobs are slow and billed, so a request first looks for a matching
//! job that already exists. A succeeded match is reused; a pending one is
//! waited on or reported as retryable; only when nothing matches is a new
//! job requested.

use crate::context::{Session, WaitSettings};
use crate::error::{OpError, OpResult};
use crate::policy::RetrievalPolicy;
use icebox_remote::{JobAction, JobHandle};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument};

/// Which existing jobs can satisfy a request.
#[derive(Debug, Clone)]
pub struct JobQuery {
    pub action: JobAction,
    /// Required target archive for retrievals.
    pub archive_id: Option<String>,
    /// How old a completed inventory may be and still be reused.
    pub max_age: Option<Duration>,
    /// Human-readable target used in messages.
    pub label: String,
}

impl JobQuery {
    /// Inventory of `vault`. Without `max_age` only pending jobs match.
    pub fn inventory(vault: &str, max_age: Option<Duration>) -> Self {
        Self {
            action: JobAction::InventoryRetrieval,
            archive_id: None,
            max_age,
            label: vault.to_string(),
        }
    }

    /// Retrieval of one archive, referred to as `reference` in messages.
    pub fn retrieval(archive_id: &str, reference: &str) -> Self {
        Self {
            action: JobAction::ArchiveRetrieval,
            archive_id: Some(archive_id.to_string()),
            max_age: None,
            label: reference.to_string(),
        }
    }

    /// Whether `job` can satisfy this query at `now`.
    pub fn matches(&self, job: &JobHandle, now: OffsetDateTime) -> bool {
        if job.action != self.action {
            return false;
        }
        match self.action {
            JobAction::ArchiveRetrieval => job.archive_id == self.archive_id,
            JobAction::InventoryRetrieval => {
                if job.is_pending() {
                    return true;
                }
                match (self.max_age, job.completion_time) {
                    (Some(max_age), Some(completed)) => completed > now - max_age,
                    _ => false,
                }
            }
        }
    }

    fn pending_message(&self) -> String {
        match self.action {
            JobAction::InventoryRetrieval => {
                format!("job still pending for inventory on {:?}", self.label)
            }
            JobAction::ArchiveRetrieval => {
                format!("job still pending for archive {:?}", self.label)
            }
        }
    }

    fn queued_message(&self) -> String {
        match self.action {
            JobAction::InventoryRetrieval => format!("queued inventory job for {:?}", self.label),
            JobAction::ArchiveRetrieval => {
                format!("queued retrieval job for archive {:?}", self.label)
            }
        }
    }

    fn describe(&self) -> String {
        match self.action {
            JobAction::InventoryRetrieval => format!("inventory of {:?}", self.label),
            JobAction::ArchiveRetrieval => format!("retrieval of archive {:?}", self.label),
        }
    }
}

/// The most recently completed succeeded job, if any.
pub fn latest_succeeded(jobs: &[JobHandle]) -> Option<&JobHandle> {
    jobs.iter()
        .filter(|job| job.is_succeeded())
        .max_by_key(|job| job.completion_time.unwrap_or(job.creation_time))
}

/// Finds, creates and waits on remote jobs for one session.
pub struct JobCoordinator<'a> {
    session: &'a Session,
}

impl<'a> JobCoordinator<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Return a succeeded job matching `query`, requesting one if needed.
    ///
    /// Without `wait`, a pending match (existing or just requested) yields
    /// `OpError::Retryable` and never a second request.
    #[instrument(skip(self, query), fields(vault = %vault, target = %query.label))]
    pub async fn get_or_create(
        &self,
        vault: &str,
        query: &JobQuery,
        wait: bool,
    ) -> OpResult<JobHandle> {
        let now = OffsetDateTime::now_utc();
        let matching: Vec<JobHandle> = self
            .session
            .remote()
            .list_jobs(vault)
            .await?
            .into_iter()
            .filter(|job| query.matches(job, now))
            .collect();

        if let Some(job) = latest_succeeded(&matching) {
            debug!(job = %job.id, "reusing completed job");
            return Ok(job.clone());
        }

        let pending: Vec<JobHandle> = matching.into_iter().filter(|j| j.is_pending()).collect();
        if !pending.is_empty() {
            if !wait {
                return Err(OpError::retry(query.pending_message()));
            }
            return self.wait_for(vault, pending, query).await;
        }

        let job = self.request(vault, query).await?;
        if !wait {
            return Err(OpError::retry(query.queued_message()));
        }
        self.wait_for(vault, vec![job], query).await
    }

    async fn request(&self, vault: &str, query: &JobQuery) -> OpResult<JobHandle> {
        let remote = self.session.remote();
        let job = match (query.action, query.archive_id.as_deref()) {
            (JobAction::InventoryRetrieval, _) => remote.request_inventory_job(vault).await?,
            (JobAction::ArchiveRetrieval, Some(archive_id)) => {
                let policy = RetrievalPolicy::new(self.session.config_provider());
                policy.admit(OffsetDateTime::now_utc()).await?;
                let job = remote
                    .request_archive_retrieval_job(vault, archive_id)
                    .await?;
                policy
                    .charge(job.archive_size.unwrap_or(0), job.creation_time)
                    .await?;
                job
            }
            (JobAction::ArchiveRetrieval, None) => {
                return Err(OpError::Usage(
                    "archive retrieval requires an archive id".to_string(),
                ));
            }
        };
        info!(job = %job.id, vault = %vault, "requested {}", query.describe());
        Ok(job)
    }

    fn wait_settings(&self, query: &JobQuery) -> WaitSettings {
        let wait = self.session.wait_settings();
        match query.action {
            JobAction::ArchiveRetrieval => {
                wait.capped_to_days(self.session.config().retrieval.max_retrieval_days)
            }
            JobAction::InventoryRetrieval => wait,
        }
    }

    /// Poll `jobs` until one succeeds.
    ///
    /// Fails with `Timeout` after the configured number of polls, with
    /// `JobFailed` once every job has failed, and with `Cancelled` as soon
    /// as the session is cancelled.
    async fn wait_for(
        &self,
        vault: &str,
        mut jobs: Vec<JobHandle>,
        query: &JobQuery,
    ) -> OpResult<JobHandle> {
        let settings = self.wait_settings(query);
        let cancel = self.session.cancel_token();
        let mut tries_left = settings.max_polls;

        loop {
            self.refresh(vault, &mut jobs).await?;
            if let Some(job) = latest_succeeded(&jobs) {
                return Ok(job.clone());
            }
            if jobs.iter().all(|j| !j.is_pending()) {
                return Err(OpError::JobFailed(query.describe()));
            }
            if tries_left == 0 {
                return Err(OpError::Timeout(query.describe()));
            }
            tries_left -= 1;

            debug!(
                vault = %vault,
                pending = jobs.len(),
                tries_left,
                "waiting for {}",
                query.describe()
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(OpError::Cancelled(query.describe())),
                _ = tokio::time::sleep(settings.interval) => {}
            }
        }
    }

    async fn refresh(&self, vault: &str, jobs: &mut [JobHandle]) -> OpResult<()> {
        for job in jobs.iter_mut() {
            if job.is_pending() {
                *job = self.session.remote().describe_job(vault, &job.id).await?;
            }
        }
        Ok(())
    }
}
