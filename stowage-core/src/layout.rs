//! Object key layout of a datastore.
//!
//! ```text
//! <datastore>/.chunks/<shard>/<digest>
//! <datastore>/<type>/<id>/<time>/index.json.blob
//! <datastore>/<type>/<id>/<time>/<archive>.idx
//! ```

use crate::digest::ChunkDigest;
use crate::error::{Result, StowageError};
use crate::model::{BackupType, GroupId, SnapshotId, parse_backup_time, validate_component};

pub const CHUNK_DIR: &str = ".chunks";
pub const MANIFEST_NAME: &str = "index.json.blob";
pub const INDEX_SUFFIX: &str = ".idx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreLayout {
    datastore: String,
}

/// A key below a snapshot directory, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotObject {
    pub snapshot: SnapshotId,
    /// Directory prefix exactly as listed, ending with `/`. It differs from
    /// [`DatastoreLayout::snapshot_dir`] when the time component was not
    /// written in canonical whole-second UTC form.
    pub dir: String,
    pub file_name: String,
}

impl DatastoreLayout {
    pub fn new(datastore: impl Into<String>) -> Result<Self> {
        let datastore = datastore.into();
        validate_component("datastore name", &datastore)
            .map_err(|error| StowageError::Config(error.to_string()))?;
        Ok(Self { datastore })
    }

    pub fn datastore(&self) -> &str {
        &self.datastore
    }

    pub fn chunk_prefix(&self) -> String {
        format!("{}/{}/", self.datastore, CHUNK_DIR)
    }

    pub fn chunk_key(&self, digest: &ChunkDigest) -> String {
        format!("{}{}/{}", self.chunk_prefix(), digest.shard(), digest.to_hex())
    }

    /// Recover the digest from a chunk key; `None` for anything else under
    /// the chunk prefix (temp files, shard markers, foreign objects).
    pub fn parse_chunk_key(&self, key: &str) -> Option<ChunkDigest> {
        let rest = key.strip_prefix(&self.chunk_prefix())?;
        let (shard, name) = rest.split_once('/')?;
        let digest: ChunkDigest = name.parse().ok()?;
        (digest.shard() == shard).then_some(digest)
    }

    pub fn type_prefix(&self, backup_type: BackupType) -> String {
        format!("{}/{}/", self.datastore, backup_type)
    }

    pub fn group_prefix(&self, group: &GroupId) -> String {
        format!("{}{}/", self.type_prefix(group.backup_type), group.backup_id)
    }

    pub fn snapshot_dir(&self, snapshot: &SnapshotId) -> String {
        format!(
            "{}{}/",
            self.group_prefix(&snapshot.group),
            snapshot.time_component()
        )
    }

    pub fn manifest_key(&self, snapshot: &SnapshotId) -> String {
        format!("{}{}", self.snapshot_dir(snapshot), MANIFEST_NAME)
    }

    pub fn archive_key(&self, snapshot: &SnapshotId, archive: &str) -> String {
        format!("{}{}", self.snapshot_dir(snapshot), archive)
    }

    /// Split `<datastore>/<type>/<id>/<time>/<file>` into its parts.
    pub fn parse_snapshot_key(&self, key: &str) -> Option<SnapshotObject> {
        let rest = key.strip_prefix(&self.datastore)?.strip_prefix('/')?;
        let mut parts = rest.splitn(4, '/');
        let backup_type: BackupType = parts.next()?.parse().ok()?;
        let backup_id = parts.next()?;
        let time_component = parts.next()?;
        let time = parse_backup_time(time_component).ok()?;
        let file_name = parts.next()?;
        if file_name.is_empty() || file_name.contains('/') {
            return None;
        }

        let group = GroupId::new(backup_type, backup_id).ok()?;
        let dir = format!(
            "{}/{}/{}/{}/",
            self.datastore, group.backup_type, group.backup_id, time_component
        );
        Some(SnapshotObject {
            snapshot: SnapshotId::new(group, time),
            dir,
            file_name: file_name.to_string(),
        })
    }
}

pub fn validate_archive_name(name: &str) -> Result<()> {
    validate_component("archive name", name)?;
    if !name.ends_with(INDEX_SUFFIX) || name.len() == INDEX_SUFFIX.len() {
        return Err(StowageError::InvalidRequest(format!(
            "archive name must end with {}: {}",
            INDEX_SUFFIX, name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_backup_time;

    fn snapshot() -> SnapshotId {
        let group = GroupId::new(BackupType::Ct, "201").unwrap();
        SnapshotId::new(group, parse_backup_time("2024-03-04T05:06:07Z").unwrap())
    }

    #[test]
    fn test_chunk_key_round_trip() {
        let layout = DatastoreLayout::new("store1").unwrap();
        let digest = ChunkDigest::compute(b"chunk");
        let key = layout.chunk_key(&digest);

        assert!(key.starts_with("store1/.chunks/"));
        assert_eq!(layout.parse_chunk_key(&key), Some(digest));
    }

    #[test]
    fn test_chunk_key_rejects_foreign_objects() {
        let layout = DatastoreLayout::new("store1").unwrap();
        let digest = ChunkDigest::compute(b"chunk");

        assert_eq!(layout.parse_chunk_key("store1/.chunks/readme.txt"), None);
        assert_eq!(
            layout.parse_chunk_key(&format!("store1/.chunks/0000/{}", digest)),
            None
        );
        assert_eq!(
            layout.parse_chunk_key(&format!("store2/.chunks/{}/{}", digest.shard(), digest)),
            None
        );
    }

    #[test]
    fn test_snapshot_keys() {
        let layout = DatastoreLayout::new("store1").unwrap();
        let id = snapshot();

        assert_eq!(
            layout.manifest_key(&id),
            "store1/ct/201/2024-03-04T05:06:07Z/index.json.blob"
        );

        let parsed = layout
            .parse_snapshot_key(&layout.archive_key(&id, "root.pxar.idx"))
            .unwrap();
        assert_eq!(parsed.snapshot, id);
        assert_eq!(parsed.dir, layout.snapshot_dir(&id));
        assert_eq!(parsed.file_name, "root.pxar.idx");
    }

    #[test]
    fn test_parse_snapshot_key_keeps_listed_dir() {
        let layout = DatastoreLayout::new("store1").unwrap();
        let parsed = layout
            .parse_snapshot_key("store1/ct/201/2024-03-04T05:06:07.500Z/index.json.blob")
            .unwrap();
        assert_eq!(parsed.snapshot, snapshot());
        assert_eq!(parsed.dir, "store1/ct/201/2024-03-04T05:06:07.500Z/");
        assert_ne!(parsed.dir, layout.snapshot_dir(&parsed.snapshot));

        let offset = layout
            .parse_snapshot_key("store1/ct/201/2024-03-04T06:06:07+01:00/disk.idx")
            .unwrap();
        assert_eq!(offset.snapshot, snapshot());
        assert_eq!(offset.dir, "store1/ct/201/2024-03-04T06:06:07+01:00/");
    }

    #[test]
    fn test_parse_snapshot_key_skips_unrelated_keys() {
        let layout = DatastoreLayout::new("store1").unwrap();
        assert!(layout.parse_snapshot_key("store1/ct/201/owner").is_none());
        assert!(layout.parse_snapshot_key("store1/tape/1/2024-03-04T05:06:07Z/x").is_none());
        assert!(layout.parse_snapshot_key("store1/ct/201/yesterday/x.idx").is_none());
        assert!(layout.parse_snapshot_key("store10/ct/201/2024-03-04T05:06:07Z/x.idx").is_none());
    }

    #[test]
    fn test_validate_names() {
        assert!(DatastoreLayout::new("").is_err());
        assert!(DatastoreLayout::new("a/b").is_err());
        assert!(validate_archive_name("disk.img.idx").is_ok());
        assert!(validate_archive_name(".idx").is_err());
        assert!(validate_archive_name("disk.img").is_err());
        assert!(validate_archive_name("sub/disk.idx").is_err());
    }
}
