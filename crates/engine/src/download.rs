//! Chunked download of retrieval job output.

use crate::error::{OpError, OpResult};
use icebox_remote::{ArchiveStore, JobHandle, split_ranges};
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Where retrieved bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    /// `-` means standard output.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// Copy a succeeded job's output into `writer`, in ranged parts of at most
/// `part_size` bytes when the output size is known and larger than one part.
///
/// Returns the number of bytes written, which always equals the job's
/// archive size when that is known.
pub async fn copy_job_output<W>(
    remote: &dyn ArchiveStore,
    job: &JobHandle,
    part_size: u64,
    writer: &mut W,
) -> OpResult<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let total = job.archive_size.unwrap_or(0);
    if total <= part_size {
        let body = remote.get_job_output(&job.vault, &job.id, None).await?;
        writer.write_all(&body).await?;
        return expect_length(job, body.len() as u64);
    }

    let ranges = split_ranges(total, part_size);
    let parts = ranges.len();
    let mut written = 0u64;
    for (index, range) in ranges.into_iter().enumerate() {
        let body = remote
            .get_job_output(&job.vault, &job.id, Some(range))
            .await?;
        writer.write_all(&body).await?;
        written += body.len() as u64;
        debug!(job = %job.id, part = index + 1, parts, %range, "downloaded part");
    }
    expect_length(job, written)
}

fn expect_length(job: &JobHandle, received: u64) -> OpResult<u64> {
    match job.archive_size {
        Some(expected) if expected != received => Err(OpError::ShortOutput {
            job: job.id.clone(),
            expected,
            received,
        }),
        _ => Ok(received),
    }
}

/// Write a job's output to `dest`.
///
/// An existing file is overwritten in place and then truncated to the
/// archive size, so stale trailing data never survives.
pub async fn write_job_output(
    remote: &dyn ArchiveStore,
    job: &JobHandle,
    dest: &Destination,
    part_size: u64,
) -> OpResult<u64> {
    let written = match dest {
        Destination::Stdout => {
            let mut stdout = tokio::io::stdout();
            let written = copy_job_output(remote, job, part_size, &mut stdout).await?;
            stdout.flush().await?;
            written
        }
        Destination::File(path) => {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .await?;
            let written = copy_job_output(remote, job, part_size, &mut file).await?;
            file.flush().await?;
            file.set_len(job.archive_size.unwrap_or(written)).await?;
            file.sync_all().await?;
            info!(job = %job.id, path = %path.display(), bytes = written, "wrote archive");
            written
        }
    };
    Ok(written)
}
