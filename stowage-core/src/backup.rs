use crate::codec::{encode_index, encode_manifest};
use crate::digest::ChunkDigest;
use crate::error::{Result, StowageError};
use crate::layout::{DatastoreLayout, validate_archive_name};
use crate::model::{ArchiveRef, ChunkEntry, ChunkIndex, SnapshotId, SnapshotManifest};
use crate::storage::ObjectStoreAdapter;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Writes one snapshot: chunks first, then index blobs, then the manifest.
///
/// A chunk that already exists is reused only while it is younger than half
/// the retention window. Older copies are uploaded again so their
/// last-modified time moves past any collector cutoff that might otherwise
/// remove them before the manifest lands.
pub struct BackupWriter {
    store: Arc<dyn ObjectStoreAdapter>,
    layout: DatastoreLayout,
    snapshot: SnapshotId,
    refresh_after: Duration,
    archives: Vec<ArchiveRef>,
    stats: BackupStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkUpload {
    pub entry: ChunkEntry,
    pub uploaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub chunks_uploaded: u64,
    pub chunks_reused: u64,
    pub bytes_uploaded: u64,
}

impl BackupWriter {
    /// Fails with `InvalidRequest` if the snapshot is already committed.
    pub async fn new(
        store: Arc<dyn ObjectStoreAdapter>,
        layout: DatastoreLayout,
        snapshot: SnapshotId,
        retention_window: Duration,
    ) -> Result<Self> {
        if store.head(&layout.manifest_key(&snapshot)).await?.is_some() {
            return Err(StowageError::InvalidRequest(format!(
                "snapshot {} already exists in datastore {}",
                snapshot,
                layout.datastore()
            )));
        }

        Ok(Self {
            store,
            layout,
            snapshot,
            refresh_after: retention_window / 2,
            archives: Vec::new(),
            stats: BackupStats::default(),
        })
    }

    pub fn snapshot(&self) -> &SnapshotId {
        &self.snapshot
    }

    pub fn stats(&self) -> &BackupStats {
        &self.stats
    }

    pub async fn put_chunk(&mut self, data: Bytes) -> Result<ChunkUpload> {
        let digest = ChunkDigest::compute(&data);
        let entry = ChunkEntry {
            digest,
            size: data.len() as u64,
        };
        let key = self.layout.chunk_key(&digest);

        if let Some(existing) = self.store.head(&key).await? {
            // negative age (clock skew) counts as fresh
            let fresh = (Utc::now() - existing.last_modified)
                .to_std()
                .map_or(true, |age| age < self.refresh_after);
            if fresh {
                self.stats.chunks_reused += 1;
                return Ok(ChunkUpload {
                    entry,
                    uploaded: false,
                });
            }
            tracing::debug!("refreshing aged chunk {}", key);
        }

        self.store.put(&key, data).await?;
        self.stats.chunks_uploaded += 1;
        self.stats.bytes_uploaded += entry.size;
        Ok(ChunkUpload {
            entry,
            uploaded: true,
        })
    }

    pub async fn write_index(&mut self, name: &str, chunks: Vec<ChunkEntry>) -> Result<ArchiveRef> {
        validate_archive_name(name)?;
        if self.archives.iter().any(|archive| archive.name == name) {
            return Err(StowageError::InvalidRequest(format!(
                "archive {} written twice in snapshot {}",
                name, self.snapshot
            )));
        }

        let index = ChunkIndex::new(chunks);
        let archive = ArchiveRef {
            name: name.to_string(),
            size: index.total_size()?,
            chunk_count: index.chunks.len() as u64,
        };
        let bytes = encode_index(&index)?;
        self.store
            .put(&self.layout.archive_key(&self.snapshot, name), Bytes::from(bytes))
            .await?;

        self.archives.push(archive.clone());
        Ok(archive)
    }

    /// Commit the snapshot by writing its manifest.
    pub async fn finish(self) -> Result<SnapshotManifest> {
        if self.archives.is_empty() {
            return Err(StowageError::InvalidRequest(format!(
                "snapshot {} has no archives",
                self.snapshot
            )));
        }

        let manifest = SnapshotManifest {
            backup_type: self.snapshot.group.backup_type,
            backup_id: self.snapshot.group.backup_id.clone(),
            backup_time: self.snapshot.backup_time,
            archives: self.archives,
        };
        let bytes = encode_manifest(&manifest)?;
        self.store
            .put(&self.layout.manifest_key(&self.snapshot), Bytes::from(bytes))
            .await?;

        tracing::info!(
            "snapshot committed. datastore={} snapshot={} archives={} uploaded={} reused={}",
            self.layout.datastore(),
            self.snapshot,
            manifest.archives.len(),
            self.stats.chunks_uploaded,
            self.stats.chunks_reused
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_manifest;
    use crate::model::{BackupType, GroupId, parse_backup_time};
    use crate::storage::MemoryObjectStore;

    fn snapshot() -> SnapshotId {
        SnapshotId::new(
            GroupId::new(BackupType::Host, "db1").unwrap(),
            parse_backup_time("2024-06-01T00:00:00Z").unwrap(),
        )
    }

    async fn writer(store: &Arc<MemoryObjectStore>) -> BackupWriter {
        BackupWriter::new(
            store.clone(),
            DatastoreLayout::new("store1").unwrap(),
            snapshot(),
            Duration::from_secs(3600),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_chunks_are_uploaded_once() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut writer = writer(&store).await;

        let first = writer.put_chunk(Bytes::from("same")).await.unwrap();
        let second = writer.put_chunk(Bytes::from("same")).await.unwrap();
        assert!(first.uploaded);
        assert!(!second.uploaded);
        assert_eq!(first.entry, second.entry);
        assert_eq!(writer.stats().chunks_uploaded, 1);
        assert_eq!(writer.stats().chunks_reused, 1);
    }

    #[tokio::test]
    async fn test_aged_chunk_is_refreshed() {
        let store = Arc::new(MemoryObjectStore::new());
        let layout = DatastoreLayout::new("store1").unwrap();
        let digest = ChunkDigest::compute(b"old");
        let key = layout.chunk_key(&digest);
        store.put(&key, Bytes::from("old")).await.unwrap();
        store
            .set_last_modified(&key, Utc::now() - chrono::Duration::hours(2))
            .unwrap();

        let mut writer = writer(&store).await;
        let upload = writer.put_chunk(Bytes::from("old")).await.unwrap();
        assert!(upload.uploaded);
        let refreshed = store.head(&key).await.unwrap().unwrap();
        assert!(Utc::now() - refreshed.last_modified < chrono::Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_manifest_written_last() {
        let store = Arc::new(MemoryObjectStore::new());
        let layout = DatastoreLayout::new("store1").unwrap();
        let mut writer = writer(&store).await;

        let entry = writer.put_chunk(Bytes::from("data")).await.unwrap().entry;
        writer.write_index("root.pxar.idx", vec![entry]).await.unwrap();
        assert!(!store.contains(&layout.manifest_key(&snapshot())).unwrap());

        let manifest = writer.finish().await.unwrap();
        assert_eq!(manifest.archives.len(), 1);
        assert_eq!(manifest.archives[0].size, 4);

        let stored = store.get(&layout.manifest_key(&snapshot())).await.unwrap();
        assert_eq!(decode_manifest(&stored).unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_existing_snapshot_is_rejected() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut first = writer(&store).await;
        let entry = first.put_chunk(Bytes::from("data")).await.unwrap().entry;
        first.write_index("disk.idx", vec![entry]).await.unwrap();
        first.finish().await.unwrap();

        let result = BackupWriter::new(
            store.clone(),
            DatastoreLayout::new("store1").unwrap(),
            snapshot(),
            Duration::from_secs(3600),
        )
        .await;
        assert!(matches!(result, Err(StowageError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_invalid_archive_names() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut writer = writer(&store).await;
        assert!(writer.write_index("disk.img", Vec::new()).await.is_err());
        writer.write_index("disk.idx", Vec::new()).await.unwrap();
        assert!(writer.write_index("disk.idx", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_finish_without_archives_fails() {
        let store = Arc::new(MemoryObjectStore::new());
        let writer = writer(&store).await;
        assert!(matches!(
            writer.finish().await,
            Err(StowageError::InvalidRequest(_))
        ));
    }
}
