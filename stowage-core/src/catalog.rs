//! Snapshot catalog of one datastore.
//!
//! A snapshot is committed once its manifest exists. Directories without a
//! manifest belong to backups still in flight and are not listed.

use crate::cancel::StopSignal;
use crate::codec::{decode_index, decode_manifest};
use crate::config::DatastoreConfig;
use crate::error::{Result, StowageError};
use crate::layout::{DatastoreLayout, INDEX_SUFFIX, MANIFEST_NAME};
use crate::metadata::{MetadataProvider, MetadataWriteOutcome, build_metadata_provider};
use crate::model::{
    ArchiveRef, BackupType, ChunkIndex, GroupId, GroupSummary, MetadataUpdate, Snapshot, SnapshotId,
    SnapshotManifest, SnapshotMetadata,
};
use crate::storage::ObjectStoreAdapter;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A listed snapshot together with every index blob that decoded.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub snapshot: Snapshot,
    pub indexes: Vec<(String, ChunkIndex)>,
}

pub struct SnapshotCatalog {
    store: Arc<dyn ObjectStoreAdapter>,
    metadata: Arc<dyn MetadataProvider>,
    layout: DatastoreLayout,
    concurrency: usize,
}

impl SnapshotCatalog {
    pub fn new(
        store: Arc<dyn ObjectStoreAdapter>,
        metadata: Arc<dyn MetadataProvider>,
        layout: DatastoreLayout,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            metadata,
            layout,
            concurrency: concurrency.max(1),
        }
    }

    /// Catalog for a configured datastore, with the metadata provider that
    /// its `tagging_enabled` flag selects.
    pub fn open(store: Arc<dyn ObjectStoreAdapter>, config: &DatastoreConfig) -> Result<Self> {
        config.validate()?;
        let metadata = build_metadata_provider(store.clone(), &config.name, config.tagging_enabled)?;
        Ok(Self::new(store, metadata, config.layout()?, config.concurrency))
    }

    pub fn layout(&self) -> &DatastoreLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn ObjectStoreAdapter> {
        &self.store
    }

    pub fn metadata_enabled(&self) -> bool {
        self.metadata.enabled()
    }

    pub async fn list(&self, include_corrupted: bool) -> Result<Vec<Snapshot>> {
        let entries = self
            .scan_prefixes(self.all_type_prefixes(), &StopSignal::never())
            .await?;
        Ok(select_snapshots(entries, include_corrupted))
    }

    pub async fn list_group(&self, group: &GroupId, include_corrupted: bool) -> Result<Vec<Snapshot>> {
        let entries = self
            .scan_prefixes(vec![self.layout.group_prefix(group)], &StopSignal::never())
            .await?;
        Ok(select_snapshots(entries, include_corrupted))
    }

    /// Groups with at least one committed snapshot. Blobs are not read.
    pub async fn list_groups(&self) -> Result<Vec<GroupSummary>> {
        let committed = self
            .discover(self.all_type_prefixes(), &StopSignal::never())
            .await?;

        let mut groups: BTreeMap<GroupId, GroupSummary> = BTreeMap::new();
        for id in committed.values().map(|dir| &dir.id) {
            groups
                .entry(id.group.clone())
                .and_modify(|summary| {
                    summary.snapshot_count += 1;
                    summary.last_backup = summary.last_backup.max(id.backup_time);
                })
                .or_insert_with(|| GroupSummary {
                    group: id.group.clone(),
                    snapshot_count: 1,
                    last_backup: id.backup_time,
                });
        }

        Ok(groups.into_values().collect())
    }

    /// Newest non-corrupted snapshot of `group` taken at or before `not_after`.
    pub async fn latest(
        &self,
        group: &GroupId,
        not_after: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let snapshots = self.list_group(group, false).await?;
        Ok(snapshots
            .into_iter()
            .filter(|snapshot| snapshot.id.backup_time <= not_after)
            .max_by_key(|snapshot| snapshot.id.backup_time))
    }

    /// Every committed snapshot, corrupted ones included, with decoded
    /// indexes. Stops with `Cancelled` once `stop` fires.
    pub async fn scan(&self, stop: &StopSignal) -> Result<Vec<CatalogEntry>> {
        self.scan_prefixes(self.all_type_prefixes(), stop).await
    }

    pub async fn read_metadata(&self, id: &SnapshotId) -> Result<SnapshotMetadata> {
        let manifest_key = self.require_manifest(id).await?;
        self.metadata.read(&manifest_key).await
    }

    pub async fn write_metadata(
        &self,
        id: &SnapshotId,
        update: &MetadataUpdate,
    ) -> Result<MetadataWriteOutcome> {
        let manifest_key = self.require_manifest(id).await?;
        let outcome = self.metadata.write(&manifest_key, update).await?;
        if let MetadataWriteOutcome::Degraded { warning } = &outcome {
            tracing::warn!("metadata update for {} not persisted: {}", id, warning);
        }
        Ok(outcome)
    }

    pub async fn snapshot_exists(&self, id: &SnapshotId) -> Result<bool> {
        Ok(self
            .store
            .head(&self.layout.manifest_key(id))
            .await?
            .is_some())
    }

    /// Decoded index blob of one archive of a committed snapshot.
    pub async fn load_index(&self, id: &SnapshotId, archive: &str) -> Result<ChunkIndex> {
        let manifest_key = self.require_manifest(id).await?;
        let manifest = decode_manifest(&self.store.get(&manifest_key).await?)?;
        if !manifest.archives.iter().any(|entry| entry.name == archive) {
            return Err(StowageError::InvalidRequest(format!(
                "snapshot {} has no archive {}",
                id, archive
            )));
        }

        let bytes = self.store.get(&self.layout.archive_key(id, archive)).await?;
        decode_index(&bytes)
    }

    async fn require_manifest(&self, id: &SnapshotId) -> Result<String> {
        let manifest_key = self.layout.manifest_key(id);
        if self.store.head(&manifest_key).await?.is_none() {
            return Err(StowageError::SnapshotNotFound(format!(
                "{}:{}",
                self.layout.datastore(),
                id
            )));
        }
        Ok(manifest_key)
    }

    fn all_type_prefixes(&self) -> Vec<String> {
        BackupType::ALL
            .iter()
            .map(|backup_type| self.layout.type_prefix(*backup_type))
            .collect()
    }

    /// Committed snapshot directories under `prefixes`, keyed by the
    /// directory prefix as listed.
    async fn discover(
        &self,
        prefixes: Vec<String>,
        stop: &StopSignal,
    ) -> Result<BTreeMap<String, SnapshotDir>> {
        let mut found: BTreeMap<String, SnapshotDir> = BTreeMap::new();
        for prefix in prefixes {
            if stop.is_stopped() {
                return Err(StowageError::Cancelled);
            }

            for entry in self.store.list(&prefix).await? {
                match self.layout.parse_snapshot_key(&entry.key) {
                    Some(object) => {
                        found
                            .entry(object.dir)
                            .or_insert_with(|| SnapshotDir {
                                id: object.snapshot,
                                files: BTreeSet::new(),
                            })
                            .files
                            .insert(object.file_name);
                    }
                    None => tracing::debug!("ignoring non-snapshot key {}", entry.key),
                }
            }
        }

        found.retain(|dir, snapshot| {
            let committed = snapshot.files.contains(MANIFEST_NAME);
            if !committed {
                tracing::debug!(
                    "skipping uncommitted snapshot. datastore={} dir={}",
                    self.layout.datastore(),
                    dir
                );
            } else if *dir != self.layout.snapshot_dir(&snapshot.id) {
                tracing::warn!(
                    "snapshot directory is not in canonical form. datastore={} dir={} snapshot={}",
                    self.layout.datastore(),
                    dir,
                    snapshot.id
                );
            }
            committed
        });
        Ok(found)
    }

    async fn scan_prefixes(
        &self,
        prefixes: Vec<String>,
        stop: &StopSignal,
    ) -> Result<Vec<CatalogEntry>> {
        let committed = self.discover(prefixes, stop).await?;

        let loaded: Vec<Option<CatalogEntry>> = stream::iter(
            committed
                .into_iter()
                .map(|(dir, snapshot)| self.load_snapshot(dir, snapshot, stop)),
        )
        .buffer_unordered(self.concurrency)
        .try_collect()
        .await?;

        let mut entries: Vec<CatalogEntry> = loaded.into_iter().flatten().collect();
        entries.sort_by(|a, b| a.snapshot.id.cmp(&b.snapshot.id));

        let corrupted = entries
            .iter()
            .filter(|entry| entry.snapshot.corrupted)
            .count();
        tracing::debug!(
            "scanned datastore {}: {} snapshots, {} corrupted",
            self.layout.datastore(),
            entries.len(),
            corrupted
        );
        Ok(entries)
    }

    /// Blobs are read from `dir` as listed, never from a key rebuilt out of
    /// the parsed snapshot id.
    async fn load_snapshot(
        &self,
        dir: String,
        snapshot: SnapshotDir,
        stop: &StopSignal,
    ) -> Result<Option<CatalogEntry>> {
        if stop.is_stopped() {
            return Err(StowageError::Cancelled);
        }

        let SnapshotDir { id, files } = snapshot;
        let manifest_key = format!("{}{}", dir, MANIFEST_NAME);
        let manifest_bytes = match self.store.get(&manifest_key).await {
            Ok(bytes) => bytes,
            Err(StowageError::ObjectNotFound(_)) => {
                tracing::debug!("snapshot {} disappeared while listing", manifest_key);
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let metadata = self.metadata.read(&manifest_key).await?;

        let mut problems = Vec::new();
        let mut indexes = Vec::new();
        let archives = match decode_manifest(&manifest_bytes) {
            Ok(manifest) => {
                if let Some(mismatch) = identity_mismatch(&id, &manifest) {
                    tracing::warn!("snapshot {} in {}: {}", id, dir, mismatch);
                }
                for archive in &manifest.archives {
                    match self.load_archive(&dir, &archive.name).await? {
                        Ok(index) => {
                            if let Some(mismatch) = archive_mismatch(archive, &index) {
                                tracing::warn!("snapshot {}: {}", id, mismatch);
                            }
                            indexes.push((archive.name.clone(), index));
                        }
                        Err(problem) => problems.push(problem),
                    }
                }
                manifest
                    .archives
                    .iter()
                    .map(|archive| archive.name.clone())
                    .collect()
            }
            Err(error) => {
                problems.push(error.to_string());
                files
                    .iter()
                    .filter(|name| name.ends_with(INDEX_SUFFIX))
                    .cloned()
                    .collect()
            }
        };

        let corruption = (!problems.is_empty()).then(|| problems.join("; "));
        if let Some(reason) = corruption.as_deref() {
            tracing::warn!(
                "snapshot is corrupted. datastore={} snapshot={} reason={}",
                self.layout.datastore(),
                id,
                reason
            );
        }

        Ok(Some(CatalogEntry {
            snapshot: Snapshot {
                id,
                archives,
                protected: metadata.protected,
                comment: metadata.note,
                corrupted: corruption.is_some(),
                corruption,
            },
            indexes,
        }))
    }

    /// Outer error: transport failure, aborts the listing. Inner error: the
    /// archive is missing or malformed, which marks the snapshot corrupted.
    async fn load_archive(
        &self,
        dir: &str,
        archive: &str,
    ) -> Result<std::result::Result<ChunkIndex, String>> {
        let key = format!("{}{}", dir, archive);
        let bytes = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(StowageError::ObjectNotFound(_)) => {
                return Ok(Err(format!("archive {} is missing", archive)));
            }
            Err(error) => return Err(error),
        };

        match decode_index(&bytes) {
            Ok(index) => Ok(Ok(index)),
            Err(StowageError::MalformedBlob(reason)) => {
                Ok(Err(format!("archive {}: {}", archive, reason)))
            }
            Err(error) => Err(error),
        }
    }
}

/// A committed snapshot directory found while listing.
struct SnapshotDir {
    id: SnapshotId,
    files: BTreeSet<String>,
}

/// Disagreement between a manifest entry and the index blob it names. Only
/// logged: the index decoded, so its chunks still count as referenced.
fn archive_mismatch(archive: &ArchiveRef, index: &ChunkIndex) -> Option<String> {
    let chunk_count = index.chunks.len() as u64;
    match index.total_size() {
        Ok(size) if size == archive.size && chunk_count == archive.chunk_count => None,
        Ok(size) => Some(format!(
            "archive {} has {} chunks and {} bytes, manifest records {} chunks and {} bytes",
            archive.name, chunk_count, size, archive.chunk_count, archive.size
        )),
        Err(error) => Some(format!("archive {}: {}", archive.name, error)),
    }
}

fn identity_mismatch(id: &SnapshotId, manifest: &SnapshotManifest) -> Option<String> {
    let matches = manifest.backup_type == id.group.backup_type
        && manifest.backup_id == id.group.backup_id
        && manifest.backup_time.timestamp() == id.backup_time.timestamp();
    (!matches).then(|| {
        format!(
            "manifest describes {}/{}/{}",
            manifest.backup_type,
            manifest.backup_id,
            crate::model::format_backup_time(&manifest.backup_time)
        )
    })
}

fn select_snapshots(entries: Vec<CatalogEntry>, include_corrupted: bool) -> Vec<Snapshot> {
    entries
        .into_iter()
        .map(|entry| entry.snapshot)
        .filter(|snapshot| include_corrupted || !snapshot.corrupted)
        .collect()
}
