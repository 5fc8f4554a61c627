//! Snapshot, group and index types shared by the catalog, the collector and
//! the backup/restore paths.

use crate::digest::ChunkDigest;
use crate::error::{Result, StowageError};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Vm,
    Ct,
    Host,
}

impl BackupType {
    pub const ALL: [BackupType; 3] = [BackupType::Vm, BackupType::Ct, BackupType::Host];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Vm => "vm",
            BackupType::Ct => "ct",
            BackupType::Host => "host",
        }
    }
}

impl FromStr for BackupType {
    type Err = StowageError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "vm" => Ok(BackupType::Vm),
            "ct" => Ok(BackupType::Ct),
            "host" => Ok(BackupType::Host),
            other => Err(StowageError::InvalidRequest(format!(
                "unknown backup type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lineage of snapshots for one backed-up entity within a datastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId {
    pub backup_type: BackupType,
    pub backup_id: String,
}

impl GroupId {
    pub fn new(backup_type: BackupType, backup_id: impl Into<String>) -> Result<Self> {
        let backup_id = backup_id.into();
        validate_component("backup id", &backup_id)?;
        Ok(Self {
            backup_type,
            backup_id,
        })
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backup_type, self.backup_id)
    }
}

impl FromStr for GroupId {
    type Err = StowageError;

    fn from_str(value: &str) -> Result<Self> {
        let (backup_type, backup_id) = value
            .trim_matches('/')
            .split_once('/')
            .ok_or_else(|| {
                StowageError::InvalidRequest(format!("group must be <type>/<id>: {}", value))
            })?;
        GroupId::new(backup_type.parse()?, backup_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId {
    pub group: GroupId,
    pub backup_time: DateTime<Utc>,
}

impl SnapshotId {
    /// Backup times are kept at whole-second precision, matching the key layout.
    pub fn new(group: GroupId, backup_time: DateTime<Utc>) -> Self {
        let backup_time = Utc
            .timestamp_opt(backup_time.timestamp(), 0)
            .single()
            .unwrap_or(backup_time);
        Self { group, backup_time }
    }

    pub fn time_component(&self) -> String {
        format_backup_time(&self.backup_time)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.time_component())
    }
}

impl FromStr for SnapshotId {
    type Err = StowageError;

    /// Parses `type/id/time`, the form printed by `Display`.
    fn from_str(value: &str) -> Result<Self> {
        let mut parts = value.trim_matches('/').splitn(3, '/');
        let (Some(backup_type), Some(backup_id), Some(time)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(StowageError::InvalidRequest(format!(
                "snapshot must be <type>/<id>/<time>: {}",
                value
            )));
        };

        let group = GroupId::new(backup_type.parse()?, backup_id)?;
        Ok(SnapshotId::new(group, parse_backup_time(time)?))
    }
}

pub fn format_backup_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_backup_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|error| {
            StowageError::InvalidRequest(format!("invalid backup time {}: {}", value, error))
        })
}

pub(crate) fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StowageError::InvalidRequest(format!(
            "{} cannot be empty",
            what
        )));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(StowageError::InvalidRequest(format!(
            "invalid {}: {}",
            what, value
        )));
    }
    Ok(())
}

/// One entry of an index blob: a chunk and its plaintext length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub digest: ChunkDigest,
    pub size: u64,
}

/// Ordered chunk list reconstructing one archive by concatenation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub chunks: Vec<ChunkEntry>,
}

impl ChunkIndex {
    pub fn new(chunks: Vec<ChunkEntry>) -> Self {
        Self { chunks }
    }

    /// Sum of the chunk sizes. An index whose sizes overflow `u64` cannot
    /// describe a real archive and is rejected as `MalformedBlob`.
    pub fn total_size(&self) -> Result<u64> {
        self.chunks
            .iter()
            .try_fold(0u64, |total, chunk| total.checked_add(chunk.size))
            .ok_or_else(|| {
                StowageError::MalformedBlob("index chunk sizes overflow u64".to_string())
            })
    }

    pub fn digests(&self) -> impl Iterator<Item = ChunkDigest> + '_ {
        self.chunks.iter().map(|chunk| chunk.digest)
    }
}

/// Commit record of a snapshot, written after all of its index blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub backup_type: BackupType,
    pub backup_id: String,
    pub backup_time: DateTime<Utc>,
    pub archives: Vec<ArchiveRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub name: String,
    pub size: u64,
    pub chunk_count: u64,
}

/// `protected` and `note` attributes carried outside the blob payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub protected: bool,
    pub note: String,
}

/// Partial metadata update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub protected: Option<bool>,
    pub note: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.protected.is_none() && self.note.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub archives: Vec<String>,
    pub protected: bool,
    pub comment: String,
    pub corrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corruption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: GroupId,
    pub snapshot_count: usize,
    pub last_backup: DateTime<Utc>,
}
