//! In-memory remote store.
//!
//! Jobs stay in progress until completed explicitly, unless auto-completion
//! is enabled. Inventory output is frozen at completion time, like the real
//! service, so uploads after that are not listed until the next inventory.

use crate::error::{RemoteError, RemoteResult};
use crate::models::{ByteRange, JobAction, JobHandle, JobStatus, VaultInfo};
use crate::traits::ArchiveStore;
use async_trait::async_trait;
use bytes::Bytes;
use icebox_core::timestamp;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredArchive {
    description: String,
    data: Bytes,
    created: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct StoredJob {
    handle: JobHandle,
    output: Option<Bytes>,
}

#[derive(Debug, Default)]
struct StoredVault {
    archives: BTreeMap<String, StoredArchive>,
    jobs: Vec<StoredJob>,
    last_inventory_date: Option<OffsetDateTime>,
}

#[derive(Debug, Default)]
struct State {
    vaults: BTreeMap<String, StoredVault>,
    next_id: u64,
}

impl State {
    fn vault(&self, name: &str) -> RemoteResult<&StoredVault> {
        self.vaults
            .get(name)
            .ok_or_else(|| RemoteError::VaultNotFound(name.to_string()))
    }

    fn vault_mut(&mut self, name: &str) -> RemoteResult<&mut StoredVault> {
        self.vaults
            .get_mut(name)
            .ok_or_else(|| RemoteError::VaultNotFound(name.to_string()))
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:06}", self.next_id)
    }
}

/// Remote store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    account_key: String,
    region: String,
    auto_complete: bool,
    state: Mutex<State>,
    inventory_requests: AtomicUsize,
    retrieval_requests: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(account_key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_key: account_key.into(),
            region: region.into(),
            auto_complete: false,
            state: Mutex::new(State::default()),
            inventory_requests: AtomicUsize::new(0),
            retrieval_requests: AtomicUsize::new(0),
        }
    }

    /// Complete every job as soon as it is requested.
    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    /// Number of inventory jobs requested so far.
    pub fn inventory_requests(&self) -> usize {
        self.inventory_requests.load(Ordering::SeqCst)
    }

    /// Number of archive retrieval jobs requested so far.
    pub fn retrieval_requests(&self) -> usize {
        self.retrieval_requests.load(Ordering::SeqCst)
    }

    /// Mark a job succeeded and freeze its output.
    pub async fn complete_job(&self, vault: &str, job_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        let vault = state.vault_mut(vault)?;
        complete(vault, job_id, OffsetDateTime::now_utc())
    }

    /// Mark a job failed.
    pub async fn fail_job(&self, vault: &str, job_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        let job = find_job(state.vault_mut(vault)?, job_id)?;
        job.handle.status = JobStatus::Failed;
        job.handle.completion_time = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    /// Add a job with an arbitrary state, bypassing the request counters.
    pub async fn insert_job(&self, handle: JobHandle, output: Option<Bytes>) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        state.vault_mut(&handle.vault)?.jobs.push(StoredJob { handle, output });
        Ok(())
    }

    /// Remove an archive without going through the store API, as if it was
    /// deleted by another client.
    pub async fn remove_archive_out_of_band(&self, vault: &str, archive_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state
            .vaults
            .get_mut(vault)
            .is_some_and(|v| v.archives.remove(archive_id).is_some())
    }

    async fn request_job(
        &self,
        vault: &str,
        action: JobAction,
        archive_id: Option<&str>,
    ) -> RemoteResult<JobHandle> {
        let mut state = self.state.lock().await;
        let id = state.fresh_id("job");
        let stored = state.vault_mut(vault)?;

        let archive_size = match archive_id {
            Some(archive_id) => Some(
                stored
                    .archives
                    .get(archive_id)
                    .ok_or_else(|| RemoteError::ArchiveNotFound(archive_id.to_string()))?
                    .data
                    .len() as u64,
            ),
            None => None,
        };

        let handle = JobHandle {
            id: id.clone(),
            vault: vault.to_string(),
            action,
            status: JobStatus::InProgress,
            creation_time: OffsetDateTime::now_utc(),
            completion_time: None,
            archive_id: archive_id.map(str::to_string),
            archive_size,
        };
        stored.jobs.push(StoredJob {
            handle,
            output: None,
        });

        if self.auto_complete {
            complete(stored, &id, OffsetDateTime::now_utc())?;
        }
        Ok(find_job(stored, &id)?.handle.clone())
    }
}

fn find_job<'a>(vault: &'a mut StoredVault, job_id: &str) -> RemoteResult<&'a mut StoredJob> {
    vault
        .jobs
        .iter_mut()
        .find(|j| j.handle.id == job_id)
        .ok_or_else(|| RemoteError::JobNotFound(job_id.to_string()))
}

fn inventory_json(vault: &StoredVault, inventory_date: OffsetDateTime) -> Bytes {
    let archives: Vec<serde_json::Value> = vault
        .archives
        .iter()
        .map(|(id, archive)| {
            serde_json::json!({
                "ArchiveId": id,
                "ArchiveDescription": archive.description,
                "CreationDate": timestamp::format(archive.created),
                "Size": archive.data.len(),
            })
        })
        .collect();
    let body = serde_json::json!({
        "InventoryDate": timestamp::format(inventory_date),
        "ArchiveList": archives,
    });
    Bytes::from(body.to_string())
}

fn complete(vault: &mut StoredVault, job_id: &str, now: OffsetDateTime) -> RemoteResult<()> {
    let action = find_job(vault, job_id)?.handle.action;
    let output = match action {
        JobAction::InventoryRetrieval => {
            vault.last_inventory_date = Some(now);
            inventory_json(vault, now)
        }
        JobAction::ArchiveRetrieval => {
            let archive_id = find_job(vault, job_id)?
                .handle
                .archive_id
                .clone()
                .unwrap_or_default();
            vault
                .archives
                .get(&archive_id)
                .map(|a| a.data.clone())
                .ok_or(RemoteError::ArchiveNotFound(archive_id))?
        }
    };

    let job = find_job(vault, job_id)?;
    job.handle.status = JobStatus::Succeeded;
    job.handle.completion_time = Some(now);
    job.output = Some(output);
    Ok(())
}

fn vault_info(name: &str, vault: &StoredVault) -> VaultInfo {
    VaultInfo {
        name: name.to_string(),
        size: vault.archives.values().map(|a| a.data.len() as u64).sum(),
        archive_count: vault.archives.len() as u64,
        last_inventory_date: vault.last_inventory_date,
    }
}

#[async_trait]
impl ArchiveStore for MemoryBackend {
    fn account_key(&self) -> &str {
        &self.account_key
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn list_vaults(&self) -> RemoteResult<Vec<VaultInfo>> {
        let state = self.state.lock().await;
        Ok(state
            .vaults
            .iter()
            .map(|(name, vault)| vault_info(name, vault))
            .collect())
    }

    async fn describe_vault(&self, vault: &str) -> RemoteResult<VaultInfo> {
        let state = self.state.lock().await;
        Ok(vault_info(vault, state.vault(vault)?))
    }

    async fn create_vault(&self, vault: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        state.vaults.entry(vault.to_string()).or_default();
        Ok(())
    }

    async fn delete_vault(&self, vault: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        if !state.vault(vault)?.archives.is_empty() {
            return Err(RemoteError::VaultNotEmpty(vault.to_string()));
        }
        state.vaults.remove(vault);
        Ok(())
    }

    async fn upload_archive(
        &self,
        vault: &str,
        data: Bytes,
        description: &str,
    ) -> RemoteResult<String> {
        let mut state = self.state.lock().await;
        let id = state.fresh_id("archive");
        state.vault_mut(vault)?.archives.insert(
            id.clone(),
            StoredArchive {
                description: description.to_string(),
                data,
                created: OffsetDateTime::now_utc(),
            },
        );
        Ok(id)
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        state
            .vault_mut(vault)?
            .archives
            .remove(archive_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::ArchiveNotFound(archive_id.to_string()))
    }

    async fn list_jobs(&self, vault: &str) -> RemoteResult<Vec<JobHandle>> {
        let state = self.state.lock().await;
        Ok(state
            .vault(vault)?
            .jobs
            .iter()
            .map(|j| j.handle.clone())
            .collect())
    }

    async fn describe_job(&self, vault: &str, job_id: &str) -> RemoteResult<JobHandle> {
        let mut state = self.state.lock().await;
        Ok(find_job(state.vault_mut(vault)?, job_id)?.handle.clone())
    }

    async fn request_inventory_job(&self, vault: &str) -> RemoteResult<JobHandle> {
        self.inventory_requests.fetch_add(1, Ordering::SeqCst);
        self.request_job(vault, JobAction::InventoryRetrieval, None)
            .await
    }

    async fn request_archive_retrieval_job(
        &self,
        vault: &str,
        archive_id: &str,
    ) -> RemoteResult<JobHandle> {
        self.retrieval_requests.fetch_add(1, Ordering::SeqCst);
        self.request_job(vault, JobAction::ArchiveRetrieval, Some(archive_id))
            .await
    }

    async fn get_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<ByteRange>,
    ) -> RemoteResult<Bytes> {
        let mut state = self.state.lock().await;
        let job = find_job(state.vault_mut(vault)?, job_id)?;
        let output = job.output.clone().ok_or_else(|| {
            RemoteError::JobNotFound(format!("{job_id} has no output yet"))
        })?;

        match range {
            None => Ok(output),
            Some(range) if range.end() <= output.len() as u64 => {
                Ok(output.slice(range.start() as usize..range.end() as usize))
            }
            Some(range) => Err(RemoteError::InvalidRange(format!(
                "{range} exceeds output of {} bytes",
                output.len()
            ))),
        }
    }
}
