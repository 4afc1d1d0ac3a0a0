//! Archive reference resolution and listing.

use crate::error::MetadataResult;
use crate::models::ArchiveRow;
use crate::repos::ArchiveRepo;
use icebox_core::ArchiveRef;

/// One line of a vault listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedArchive {
    /// Token that resolves back to exactly this archive.
    pub reference: String,
    pub id: String,
    pub name: Option<String>,
    /// Whether the name is shared with another live archive.
    pub contested: bool,
}

/// Turn name-ordered live rows into unambiguous references.
///
/// Unique names are emitted bare. Every member of a group sharing a name is
/// emitted in `id:` form, the first one included.
pub fn disambiguate(rows: &[ArchiveRow]) -> Vec<ListedArchive> {
    let mut listed = Vec::with_capacity(rows.len());

    for group in rows.chunk_by(|a, b| a.name.is_some() && a.name == b.name) {
        let contested = group.len() > 1;
        listed.extend(group.iter().map(|row| ListedArchive {
            reference: ArchiveRef::render(row.name.as_deref(), &row.id, contested),
            id: row.id.clone(),
            name: row.name.clone(),
            contested,
        }));
    }

    listed
}

/// List the live archives of a vault with unambiguous references.
pub async fn list_archive_refs<R>(
    repo: &R,
    account_key: &str,
    vault: &str,
) -> MetadataResult<Vec<ListedArchive>>
where
    R: ArchiveRepo + ?Sized,
{
    let mut rows = repo.list_archives(account_key, vault).await?;
    // Grouping relies on equal names being adjacent.
    rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    Ok(disambiguate(&rows))
}

/// Resolve a user-supplied token to a single live archive.
pub async fn resolve<R>(
    repo: &R,
    account_key: &str,
    vault: &str,
    token: &str,
) -> MetadataResult<ArchiveRow>
where
    R: ArchiveRepo + ?Sized,
{
    let reference = ArchiveRef::parse(token)?;
    repo.find_archive_by_ref(account_key, vault, &reference)
        .await
}
