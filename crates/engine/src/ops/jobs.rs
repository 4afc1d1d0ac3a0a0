//! Job listing.

use crate::context::Session;
use crate::error::OpResult;
use icebox_core::timestamp;
use icebox_remote::{JobAction, JobHandle};
use tracing::instrument;

/// One line per remote job across every vault in the region.
#[instrument(skip(session), fields(region = %session.region()))]
pub async fn list_jobs(session: &Session) -> OpResult<Vec<String>> {
    let remote = session.remote();
    let mut lines = Vec::new();
    for vault in remote.list_vaults().await? {
        for job in remote.list_jobs(&vault.name).await? {
            let name = job_target(session, &job).await?;
            lines.push(format_job_line(&job, &name));
        }
    }
    Ok(lines)
}

async fn job_target(session: &Session, job: &JobHandle) -> OpResult<String> {
    let Some(archive_id) = job.archive_id.as_deref() else {
        return Ok(String::new());
    };
    if job.action != JobAction::ArchiveRetrieval {
        return Ok(String::new());
    }
    let row = session
        .cache()
        .get_archive(session.account_key(), &job.vault, archive_id)
        .await?;
    Ok(match row {
        Some(row) => row.reference(),
        None => format!("id:{archive_id}"),
    })
}

/// `<action>/<status> <date> <vault:10> <name>`.
pub fn format_job_line(job: &JobHandle, name: &str) -> String {
    format!(
        "{}/{} {} {:10} {}",
        job.action.letter(),
        job.status.letter(),
        timestamp::format(job.display_time()),
        job.vault,
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use icebox_remote::JobStatus;
    use time::macros::datetime;

    #[test]
    fn test_job_line_layout() {
        let job = JobHandle {
            id: "j1".to_string(),
            vault: "photos".to_string(),
            action: JobAction::ArchiveRetrieval,
            status: JobStatus::Succeeded,
            creation_time: datetime!(2024-06-14 08:00 UTC),
            completion_time: Some(datetime!(2024-06-14 12:00 UTC)),
            archive_id: Some("a1".to_string()),
            archive_size: Some(3),
        };
        assert_eq!(
            format_job_line(&job, "beach.tar"),
            "a/d 2024-06-14T12:00:00Z photos     beach.tar"
        );

        let inventory = JobHandle {
            action: JobAction::InventoryRetrieval,
            status: JobStatus::InProgress,
            completion_time: None,
            archive_id: None,
            ..job
        };
        assert_eq!(
            format_job_line(&inventory, ""),
            "i/p 2024-06-14T08:00:00Z photos     "
        );
    }
}
