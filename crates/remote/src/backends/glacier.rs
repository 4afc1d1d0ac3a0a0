//! Amazon Glacier backend using the AWS SDK.

use crate::error::{RemoteError, RemoteResult};
use crate::models::{ByteRange, JobAction, JobHandle, JobStatus, VaultInfo};
use crate::traits::ArchiveStore;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_glacier::Client;
use aws_sdk_glacier::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_glacier::primitives::ByteStream;
use aws_sdk_glacier::types::{ActionCode, JobParameters, StatusCode};
use bytes::Bytes;
use icebox_core::timestamp;
use time::OffsetDateTime;
use tracing::instrument;

/// Account id meaning "the account that owns the credentials".
const OWN_ACCOUNT: &str = "-";

const NOT_FOUND: &str = "ResourceNotFoundException";
const INVALID_PARAMETER: &str = "InvalidParameterValueException";

/// Glacier vault store for one region.
pub struct GlacierBackend {
    client: Client,
    region: String,
    account_key: String,
}

impl std::fmt::Debug for GlacierBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlacierBackend")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl GlacierBackend {
    /// Build a client from the ambient AWS configuration.
    ///
    /// Credentials are resolved eagerly: the access key id becomes the cache
    /// account key, so a cache shared by several accounts never mixes them.
    pub async fn new(region: &str) -> RemoteResult<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let provider = config.credentials_provider().ok_or_else(|| {
            RemoteError::Config("no AWS credentials provider configured".to_string())
        })?;
        let credentials = provider.provide_credentials().await.map_err(|e| {
            RemoteError::Config(format!("failed to resolve AWS credentials: {e}"))
        })?;

        Ok(Self {
            client: Client::new(&config),
            region: region.to_string(),
            account_key: credentials.access_key_id().to_string(),
        })
    }
}

/// Map an SDK failure, turning "resource not found" into `not_found`.
fn map_sdk_error<E>(err: SdkError<E>, not_found: impl FnOnce() -> RemoteError) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if err.code() == Some(NOT_FOUND) {
        return not_found();
    }
    RemoteError::Sdk(Box::new(err))
}

fn byte_count(value: impl Into<Option<i64>>) -> u64 {
    value.into().map_or(0, |v| u64::try_from(v).unwrap_or(0))
}

fn parse_time(value: Option<&str>) -> RemoteResult<Option<OffsetDateTime>> {
    value
        .map(timestamp::parse)
        .transpose()
        .map_err(|e| RemoteError::Sdk(Box::new(e)))
}

/// Fields shared by job listings and job descriptions.
struct JobFields<'a> {
    id: Option<&'a str>,
    action: Option<&'a ActionCode>,
    status: Option<&'a StatusCode>,
    creation: Option<&'a str>,
    completion: Option<&'a str>,
    archive_id: Option<&'a str>,
    archive_size: Option<i64>,
}

macro_rules! job_fields {
    ($job:expr) => {
        JobFields {
            id: $job.job_id(),
            action: $job.action(),
            status: $job.status_code(),
            creation: $job.creation_date(),
            completion: $job.completion_date(),
            archive_id: $job.archive_id(),
            archive_size: $job.archive_size_in_bytes().into(),
        }
    };
}

/// Convert a job description. Job kinds this tool never creates yield `None`.
fn job_handle(vault: &str, fields: JobFields<'_>) -> RemoteResult<Option<JobHandle>> {
    let action = match fields.action {
        Some(ActionCode::InventoryRetrieval) => JobAction::InventoryRetrieval,
        Some(ActionCode::ArchiveRetrieval) => JobAction::ArchiveRetrieval,
        _ => return Ok(None),
    };
    let status = match fields.status {
        Some(StatusCode::Succeeded) => JobStatus::Succeeded,
        Some(StatusCode::Failed) => JobStatus::Failed,
        _ => JobStatus::InProgress,
    };
    let id = fields
        .id
        .ok_or_else(|| RemoteError::Config("job description without an id".to_string()))?;
    let creation_time = parse_time(fields.creation)?
        .ok_or_else(|| RemoteError::Config(format!("job {id} has no creation date")))?;

    Ok(Some(JobHandle {
        id: id.to_string(),
        vault: vault.to_string(),
        action,
        status,
        creation_time,
        completion_time: parse_time(fields.completion)?,
        archive_id: fields.archive_id.map(str::to_string),
        archive_size: fields.archive_size.map(byte_count),
    }))
}

#[async_trait]
impl ArchiveStore for GlacierBackend {
    fn account_key(&self) -> &str {
        &self.account_key
    }

    fn region(&self) -> &str {
        &self.region
    }

    #[instrument(skip(self), fields(backend = "glacier", region = %self.region))]
    async fn list_vaults(&self) -> RemoteResult<Vec<VaultInfo>> {
        let mut vaults = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_vaults()
                .account_id(OWN_ACCOUNT)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| RemoteError::Sdk(Box::new(e)))?;

            for vault in output.vault_list() {
                let Some(name) = vault.vault_name() else {
                    continue;
                };
                vaults.push(VaultInfo {
                    name: name.to_string(),
                    size: byte_count(vault.size_in_bytes()),
                    archive_count: byte_count(vault.number_of_archives()),
                    last_inventory_date: parse_time(vault.last_inventory_date())?,
                });
            }

            match output.marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(vaults)
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn describe_vault(&self, vault: &str) -> RemoteResult<VaultInfo> {
        let output = self
            .client
            .describe_vault()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, || RemoteError::VaultNotFound(vault.to_string())))?;

        Ok(VaultInfo {
            name: output.vault_name().unwrap_or(vault).to_string(),
            size: byte_count(output.size_in_bytes()),
            archive_count: byte_count(output.number_of_archives()),
            last_inventory_date: parse_time(output.last_inventory_date())?,
        })
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn create_vault(&self, vault: &str) -> RemoteResult<()> {
        self.client
            .create_vault()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .send()
            .await
            .map_err(|e| RemoteError::Sdk(Box::new(e)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn delete_vault(&self, vault: &str) -> RemoteResult<()> {
        match self
            .client
            .delete_vault()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // Glacier refuses to delete vaults holding archives as of the
            // last inventory, or written to since.
            Err(e) if e.code() == Some(INVALID_PARAMETER) => {
                Err(RemoteError::VaultNotEmpty(vault.to_string()))
            }
            Err(e) => Err(map_sdk_error(e, || {
                RemoteError::VaultNotFound(vault.to_string())
            })),
        }
    }

    #[instrument(skip(self, data), fields(backend = "glacier", size = data.len()))]
    async fn upload_archive(
        &self,
        vault: &str,
        data: Bytes,
        description: &str,
    ) -> RemoteResult<String> {
        let output = self
            .client
            .upload_archive()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .archive_description(description)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, || RemoteError::VaultNotFound(vault.to_string())))?;

        output
            .archive_id()
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Config("upload returned no archive id".to_string()))
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn delete_archive(&self, vault: &str, archive_id: &str) -> RemoteResult<()> {
        self.client
            .delete_archive()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .archive_id(archive_id)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(e, || RemoteError::ArchiveNotFound(archive_id.to_string()))
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn list_jobs(&self, vault: &str) -> RemoteResult<Vec<JobHandle>> {
        let mut jobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_jobs()
                .account_id(OWN_ACCOUNT)
                .vault_name(vault)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, || RemoteError::VaultNotFound(vault.to_string())))?;

            for job in output.job_list() {
                if let Some(handle) = job_handle(vault, job_fields!(job))? {
                    jobs.push(handle);
                }
            }

            match output.marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(jobs)
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn describe_job(&self, vault: &str, job_id: &str) -> RemoteResult<JobHandle> {
        let output = self
            .client
            .describe_job()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .job_id(job_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, || RemoteError::JobNotFound(job_id.to_string())))?;

        job_handle(vault, job_fields!(output))?
            .ok_or_else(|| RemoteError::JobNotFound(job_id.to_string()))
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn request_inventory_job(&self, vault: &str) -> RemoteResult<JobHandle> {
        let params = JobParameters::builder()
            .r#type("inventory-retrieval")
            .format("JSON")
            .build();
        let job_id = self.initiate_job(vault, params).await?;
        self.describe_job(vault, &job_id).await
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn request_archive_retrieval_job(
        &self,
        vault: &str,
        archive_id: &str,
    ) -> RemoteResult<JobHandle> {
        let params = JobParameters::builder()
            .r#type("archive-retrieval")
            .archive_id(archive_id)
            .build();
        let job_id = self.initiate_job(vault, params).await?;
        self.describe_job(vault, &job_id).await
    }

    #[instrument(skip(self), fields(backend = "glacier"))]
    async fn get_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<ByteRange>,
    ) -> RemoteResult<Bytes> {
        let output = self
            .client
            .get_job_output()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .job_id(job_id)
            .set_range(range.map(|r| r.header_value()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, || RemoteError::JobNotFound(job_id.to_string())))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::Sdk(Box::new(e)))?
            .into_bytes();

        if let Some(range) = range
            && bytes.len() as u64 != range.len()
        {
            return Err(RemoteError::InvalidRange(format!(
                "requested {range} of job {job_id} but received {} bytes",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

impl GlacierBackend {
    async fn initiate_job(&self, vault: &str, params: JobParameters) -> RemoteResult<String> {
        let output = self
            .client
            .initiate_job()
            .account_id(OWN_ACCOUNT)
            .vault_name(vault)
            .job_parameters(params)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, || RemoteError::VaultNotFound(vault.to_string())))?;

        output
            .job_id()
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Config("initiate job returned no job id".to_string()))
    }
}
