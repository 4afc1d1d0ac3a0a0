//! Vault, job and inventory views returned by the remote store.

use crate::error::{RemoteError, RemoteResult};
use serde::Deserialize;
use std::fmt;
use time::OffsetDateTime;

/// A vault as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultInfo {
    pub name: String,
    /// Size in bytes as of the last inventory.
    pub size: u64,
    pub archive_count: u64,
    pub last_inventory_date: Option<OffsetDateTime>,
}

/// What a job computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    InventoryRetrieval,
    ArchiveRetrieval,
}

impl JobAction {
    /// Single-letter tag used in job listings.
    pub fn letter(self) -> char {
        match self {
            Self::InventoryRetrieval => 'i',
            Self::ArchiveRetrieval => 'a',
        }
    }
}

/// Remote job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Single-letter tag used in job listings.
    pub fn letter(self) -> char {
        match self {
            Self::InProgress => 'p',
            Self::Succeeded => 'd',
            Self::Failed => 'e',
        }
    }
}

/// A live view of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub vault: String,
    pub action: JobAction,
    pub status: JobStatus,
    pub creation_time: OffsetDateTime,
    pub completion_time: Option<OffsetDateTime>,
    /// Target archive for retrieval jobs.
    pub archive_id: Option<String>,
    /// Output size of retrieval jobs.
    pub archive_size: Option<u64>,
}

impl JobHandle {
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::InProgress
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Completion time for finished jobs, creation time otherwise.
    pub fn display_time(&self) -> OffsetDateTime {
        self.completion_time.unwrap_or(self.creation_time)
    }
}

/// A half-open byte range `[start, end)` of a job's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> RemoteResult<Self> {
        if end <= start {
            return Err(RemoteError::InvalidRange(format!(
                "end ({end}) must be greater than start ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// HTTP `Range` value; both bounds are inclusive on the wire.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end - 1)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Split `total` bytes into consecutive ranges of at most `part_size` bytes.
pub fn split_ranges(total: u64, part_size: u64) -> Vec<ByteRange> {
    if total == 0 || part_size == 0 {
        return Vec::new();
    }
    (0..total)
        .step_by(part_size as usize)
        .map(|start| ByteRange {
            start,
            end: (start + part_size).min(total),
        })
        .collect()
}

/// Inventory job output as returned by the remote store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InventorySnapshot {
    #[serde(rename = "VaultARN", default)]
    pub vault_arn: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub inventory_date: OffsetDateTime,
    #[serde(default)]
    pub archive_list: Vec<InventoryArchive>,
}

/// One archive in an inventory snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InventoryArchive {
    pub archive_id: String,
    #[serde(default)]
    pub archive_description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_date: OffsetDateTime,
    #[serde(default)]
    pub size: u64,
}

impl InventorySnapshot {
    /// Parse a JSON inventory body.
    pub fn from_json(body: &[u8]) -> RemoteResult<Self> {
        serde_json::from_slice(body).map_err(|e| RemoteError::InvalidInventory(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ranges_covers_total() {
        let ranges = split_ranges(20, 8);
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 8).unwrap(),
                ByteRange::new(8, 16).unwrap(),
                ByteRange::new(16, 20).unwrap(),
            ]
        );
        assert_eq!(split_ranges(16, 8).len(), 2);
        assert!(split_ranges(0, 8).is_empty());
    }

    #[test]
    fn test_range_header_is_inclusive() {
        let range = ByteRange::new(8, 16).unwrap();
        assert_eq!(range.header_value(), "bytes=8-15");
        assert_eq!(range.len(), 8);
        assert!(ByteRange::new(5, 5).is_err());
    }

    #[test]
    fn test_parse_inventory() {
        let body = br#"{
            "VaultARN": "arn:aws:glacier:us-east-1:012345678901:vaults/photos",
            "InventoryDate": "2013-03-20T17:03:43Z",
            "ArchiveList": [
                {
                    "ArchiveId": "a1",
                    "ArchiveDescription": "beach.tar",
                    "CreationDate": "2013-03-18T10:00:00.221Z",
                    "Size": 3145728,
                    "SHA256TreeHash": "deadbeef"
                },
                {
                    "ArchiveId": "a2",
                    "ArchiveDescription": "",
                    "CreationDate": "2013-03-19T10:00:00Z",
                    "Size": 12
                }
            ]
        }"#;

        let snapshot = InventorySnapshot::from_json(body).unwrap();
        assert_eq!(snapshot.inventory_date.unix_timestamp(), 1_363_799_023);
        assert_eq!(snapshot.archive_list.len(), 2);
        assert_eq!(snapshot.archive_list[0].archive_description, "beach.tar");
        assert_eq!(snapshot.archive_list[0].size, 3_145_728);
        assert!(snapshot.archive_list[1].archive_description.is_empty());
    }

    #[test]
    fn test_parse_inventory_rejects_garbage() {
        let err = InventorySnapshot::from_json(b"not json").unwrap_err();
        assert!(matches!(err, RemoteError::InvalidInventory(_)));
    }
}
