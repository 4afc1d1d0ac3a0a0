//! Archive operations: listing, upload, delete, retrieval and presence checks.

use super::not_found_as;
use super::vault::{SyncOptions, sync_vault};
use crate::context::Session;
use crate::download::{Destination, write_job_output};
use crate::error::{ErrorKind, OpError, OpResult};
use crate::jobs::{JobCoordinator, JobQuery};
use bytes::Bytes;
use icebox_core::description::normalize_description;
use icebox_metadata::models::ArchiveRow;
use icebox_metadata::{ListedArchive, MetadataError, resolver};
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument};

/// Default freshness window for presence checks.
pub const DEFAULT_PRESENCE_MAX_AGE: Duration = Duration::hours(80);

/// The cached view of one vault's archives.
#[derive(Debug, Clone)]
pub struct ArchiveListing {
    /// Creation time of the inventory job behind the last sync.
    pub last_synced: Option<OffsetDateTime>,
    /// Last inventory date reported by the remote store, if reachable.
    pub last_inventory: Option<OffsetDateTime>,
    pub entries: Vec<ListedArchive>,
}

/// List a vault's live archives with unambiguous references.
#[instrument(skip(session))]
pub async fn list_archives(session: &Session, vault: &str) -> OpResult<ArchiveListing> {
    let account = session.account_key();
    let cache = session.cache();

    let entries = resolver::list_archive_refs(cache, account, vault).await?;
    let last_synced = cache
        .get_vault(account, vault, session.region())
        .await?
        .and_then(|row| row.last_synced_at);
    let last_inventory = match session.remote().describe_vault(vault).await {
        Ok(info) => info.last_inventory_date,
        Err(err) => {
            debug!(vault = %vault, error = %err, "remote vault description unavailable");
            None
        }
    };

    Ok(ArchiveListing {
        last_synced,
        last_inventory,
        entries,
    })
}

/// Upload `path` to `vault`, named `name` or the file's base name.
#[instrument(skip(session, path), fields(path = %path.display()))]
pub async fn upload_archive(
    session: &Session,
    vault: &str,
    path: &Path,
    name: Option<&str>,
) -> OpResult<ArchiveRow> {
    let name = match name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OpError::Usage(format!(
                    "cannot derive an archive name from {}; use --name",
                    path.display()
                ))
            })?,
    };
    let description = normalize_description(&name)?;
    let data = Bytes::from(tokio::fs::read(path).await?);
    let size = data.len();

    let id = session
        .remote()
        .upload_archive(vault, data, &description)
        .await?;
    let row = ArchiveRow::uploaded(
        session.account_key(),
        vault,
        id,
        description,
        OffsetDateTime::now_utc(),
    );
    session.cache().insert_archive(&row).await?;
    info!(vault = %vault, archive = %row.reference(), id = %row.id, size, "uploaded archive");
    Ok(row)
}

/// Delete the archive `token` refers to and tombstone its record.
///
/// Resolution happens locally first; an unknown reference never reaches the
/// remote store.
#[instrument(skip(session))]
pub async fn delete_archive(session: &Session, vault: &str, token: &str) -> OpResult<ArchiveRow> {
    let account = session.account_key();
    let row = resolver::resolve(session.cache(), account, vault, token)
        .await
        .map_err(not_found_as(format!("archive {token:?}")))?;

    session.remote().delete_archive(vault, &row.id).await?;
    session
        .cache()
        .mark_archive_deleted(account, vault, &row.id, OffsetDateTime::now_utc())
        .await?;
    info!(vault = %vault, archive = %row.reference(), id = %row.id, "deleted archive");
    Ok(row)
}

/// Options for [`retrieve_archives`].
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub wait: bool,
    /// Output path, or `-` for stdout. Only valid for a single archive.
    pub output: Option<String>,
    /// Size of each ranged download.
    pub multipart_size: u64,
}

/// Retrieve each of `tokens` from `vault`.
///
/// Every token is attempted. The result is `Ok` with one message per archive
/// when all were written; `Retryable` with successes followed by pending
/// conditions when some jobs are still running; otherwise an error. A lone
/// token's failure is returned as is, several failures become `Batch`.
#[instrument(skip(session, tokens, options), fields(count = tokens.len()))]
pub async fn retrieve_archives(
    session: &Session,
    vault: &str,
    tokens: &[String],
    options: &RetrieveOptions,
) -> OpResult<Vec<String>> {
    if tokens.len() > 1 && options.output.is_some() {
        return Err(OpError::Usage(
            "cannot specify output filename with multi-archive retrieval".to_string(),
        ));
    }

    let mut successes = Vec::new();
    let mut pending = Vec::new();
    let mut failures = Vec::new();
    for token in tokens {
        match retrieve_one(session, vault, token, options).await {
            Ok(()) => successes.push(format!("retrieved archive {token:?}")),
            Err(OpError::Retryable(messages)) => pending.extend(messages),
            Err(err @ OpError::Cancelled(_)) => return Err(err),
            Err(err) => failures.push(err),
        }
    }

    if !failures.is_empty() {
        if tokens.len() == 1 {
            return Err(failures.remove(0));
        }
        let mut messages = successes;
        messages.extend(pending);
        messages.extend(failures.iter().map(ToString::to_string));
        return Err(OpError::Batch(messages));
    }
    if !pending.is_empty() {
        successes.extend(pending);
        return Err(OpError::Retryable(successes));
    }
    Ok(successes)
}

async fn retrieve_one(
    session: &Session,
    vault: &str,
    token: &str,
    options: &RetrieveOptions,
) -> OpResult<()> {
    let row = resolver::resolve(session.cache(), session.account_key(), vault, token)
        .await
        .map_err(not_found_as(format!("archive {token:?}")))?;
    let dest = destination(token, options.output.as_deref())?;

    let query = JobQuery::retrieval(&row.id, token);
    let job = JobCoordinator::new(session)
        .get_or_create(vault, &query, options.wait)
        .await?;
    write_job_output(session.remote(), &job, &dest, options.multipart_size).await?;
    Ok(())
}

fn destination(token: &str, output: Option<&str>) -> OpResult<Destination> {
    if let Some(output) = output {
        return Ok(Destination::from_arg(output));
    }
    Path::new(token)
        .file_name()
        .map(|name| Destination::File(PathBuf::from(name)))
        .ok_or_else(|| {
            OpError::Usage(format!(
                "cannot derive an output filename from {token:?}; use -o"
            ))
        })
}

/// Options for [`check_present`].
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// Wait for a sync when the cached record is too old.
    pub wait: bool,
    /// How recently the archive must have been seen. Zero never suffices.
    pub max_age: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            wait: false,
            max_age: DEFAULT_PRESENCE_MAX_AGE,
        }
    }
}

/// Outcome of a presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// Seen recently enough.
    Present,
    /// No cached record.
    NotFound,
    /// Still unknown after a sync; new uploads take a while to show up.
    NotYetInInventory,
    /// Known, but last seen before the freshness window.
    Stale,
}

impl Presence {
    /// Diagnostic line for `token`, if the archive is not present.
    pub fn message(&self, token: &str) -> Option<String> {
        match self {
            Self::Present => None,
            Self::NotFound => Some(format!("archive {token:?} not found")),
            Self::NotYetInInventory => Some(format!(
                "archive {token:?} not found, but it may not be in the inventory yet"
            )),
            Self::Stale => Some(format!(
                "archive {token:?} found, but has not been seen recently enough to consider it present"
            )),
        }
    }
}

/// Decide whether the archive `token` refers to is known to exist.
///
/// A record older than `max_age` triggers a sync of the vault; a sync still
/// pending leaves the cached answer in place.
#[instrument(skip(session, options))]
pub async fn check_present(
    session: &Session,
    vault: &str,
    token: &str,
    options: CheckOptions,
) -> OpResult<Presence> {
    let mut last_seen = match lookup_last_seen(session, vault, token).await? {
        Some(seen) => Some(seen),
        None if options.wait => None,
        None => return Ok(Presence::NotFound),
    };

    let now = OffsetDateTime::now_utc();
    let too_old = |seen: Option<OffsetDateTime>| match seen {
        Some(seen) => options.max_age.is_zero() || seen < now - options.max_age,
        None => true,
    };

    if too_old(last_seen) {
        let sync = SyncOptions {
            wait: options.wait,
            fix: false,
            max_age: options.max_age,
        };
        match sync_vault(session, vault, sync).await {
            Ok(_) => match lookup_last_seen(session, vault, token).await? {
                Some(seen) => last_seen = Some(seen),
                None => return Ok(Presence::NotYetInInventory),
            },
            Err(err) if err.kind() == ErrorKind::Retryable => {
                debug!(vault = %vault, "sync pending: {err}");
            }
            Err(err) => return Err(err),
        }
    }

    if too_old(last_seen) {
        return Ok(Presence::Stale);
    }
    Ok(Presence::Present)
}

async fn lookup_last_seen(
    session: &Session,
    vault: &str,
    token: &str,
) -> OpResult<Option<OffsetDateTime>> {
    match resolver::resolve(session.cache(), session.account_key(), vault, token).await {
        Ok(row) => Ok(Some(row.last_seen())),
        Err(MetadataError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
