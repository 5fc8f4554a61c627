use crate::catalog::SnapshotCatalog;
use crate::error::{Result, StowageError};
use crate::model::{ChunkEntry, SnapshotId};
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt, stream};

const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Rebuilds archives of committed snapshots from their chunks.
pub struct RestoreReader<'a> {
    catalog: &'a SnapshotCatalog,
    concurrency: usize,
}

impl<'a> RestoreReader<'a> {
    pub fn new(catalog: &'a SnapshotCatalog, concurrency: usize) -> Self {
        Self {
            catalog,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every chunk of `archive` in index order and concatenate them.
    /// Each chunk is checked against its digest and recorded size.
    pub async fn read_archive(&self, snapshot: &SnapshotId, archive: &str) -> Result<Bytes> {
        let index = self.catalog.load_index(snapshot, archive).await?;
        let total_size = index.total_size()?;

        let chunks: Vec<Bytes> = stream::iter(index.chunks.iter().map(|entry| self.fetch_chunk(entry)))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut body = BytesMut::with_capacity(total_size.min(MAX_PREALLOC) as usize);
        for chunk in chunks {
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(
            "archive restored. snapshot={} archive={} chunks={} bytes={}",
            snapshot,
            archive,
            index.chunks.len(),
            body.len()
        );
        Ok(body.freeze())
    }

    async fn fetch_chunk(&self, entry: &ChunkEntry) -> Result<Bytes> {
        let key = self.catalog.layout().chunk_key(&entry.digest);
        let data = self.catalog.store().get(&key).await?;
        entry.digest.verify(&data)?;
        if data.len() as u64 != entry.size {
            return Err(StowageError::MalformedBlob(format!(
                "chunk {} has {} bytes, index records {}",
                entry.digest,
                data.len(),
                entry.size
            )));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupWriter;
    use crate::config::DatastoreConfig;
    use crate::digest::ChunkDigest;
    use crate::model::{BackupType, GroupId, parse_backup_time};
    use crate::storage::{MemoryObjectStore, ObjectStoreAdapter};
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot() -> SnapshotId {
        SnapshotId::new(
            GroupId::new(BackupType::Ct, "201").unwrap(),
            parse_backup_time("2024-06-01T00:00:00Z").unwrap(),
        )
    }

    async fn backup(store: &Arc<MemoryObjectStore>, parts: &[&str]) -> SnapshotCatalog {
        let config = DatastoreConfig::new("store1");
        let mut writer = BackupWriter::new(
            store.clone(),
            config.layout().unwrap(),
            snapshot(),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();
        let mut entries = Vec::new();
        for part in parts {
            entries.push(writer.put_chunk(Bytes::from(part.to_string())).await.unwrap().entry);
        }
        writer.write_index("root.pxar.idx", entries).await.unwrap();
        writer.finish().await.unwrap();
        SnapshotCatalog::open(store.clone(), &config).unwrap()
    }

    #[tokio::test]
    async fn test_read_archive_in_order() {
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = backup(&store, &["hello ", "world", "hello "]).await;

        let reader = RestoreReader::new(&catalog, 2);
        let body = reader.read_archive(&snapshot(), "root.pxar.idx").await.unwrap();
        assert_eq!(body, Bytes::from("hello worldhello "));
    }

    #[tokio::test]
    async fn test_tampered_chunk_is_rejected() {
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = backup(&store, &["payload"]).await;
        let key = catalog.layout().chunk_key(&ChunkDigest::compute(b"payload"));
        store.put(&key, Bytes::from("tampered")).await.unwrap();

        let reader = RestoreReader::new(&catalog, 2);
        assert!(matches!(
            reader.read_archive(&snapshot(), "root.pxar.idx").await,
            Err(StowageError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_archive() {
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = backup(&store, &["payload"]).await;
        let reader = RestoreReader::new(&catalog, 2);
        assert!(matches!(
            reader.read_archive(&snapshot(), "other.idx").await,
            Err(StowageError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_chunk() {
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = backup(&store, &["payload"]).await;
        let key = catalog.layout().chunk_key(&ChunkDigest::compute(b"payload"));
        store.delete(&key).await.unwrap();

        let reader = RestoreReader::new(&catalog, 2);
        assert!(matches!(
            reader.read_archive(&snapshot(), "root.pxar.idx").await,
            Err(StowageError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_overflowing_index_is_malformed() {
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = backup(&store, &["payload"]).await;
        let index = crate::model::ChunkIndex::new(vec![
            ChunkEntry {
                digest: ChunkDigest::compute(b"payload"),
                size: u64::MAX,
            },
            ChunkEntry {
                digest: ChunkDigest::compute(b"payload"),
                size: 7,
            },
        ]);
        store
            .put(
                &catalog.layout().archive_key(&snapshot(), "root.pxar.idx"),
                Bytes::from(crate::codec::encode_index(&index).unwrap()),
            )
            .await
            .unwrap();

        let reader = RestoreReader::new(&catalog, 2);
        assert!(matches!(
            reader.read_archive(&snapshot(), "root.pxar.idx").await,
            Err(StowageError::MalformedBlob(_))
        ));
    }
}
