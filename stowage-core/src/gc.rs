//! Mark-and-sweep collection of unreferenced chunks.
//!
//! Runs against the same datastore are not excluded from each other or from
//! backups. Safety comes from the retention window: a chunk is only deleted
//! when it is unreachable and its last-modified time is older than
//! `run start - retention window`.

use crate::cancel::StopSignal;
use crate::catalog::{CatalogEntry, SnapshotCatalog};
use crate::digest::ChunkDigest;
use crate::error::{Result, StowageError};
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GcPhase {
    Mark,
    Sweep,
}

#[derive(Debug, Clone, Default)]
pub struct GcRequest {
    pub dry_run: bool,
    pub stop: StopSignal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub digest: ChunkDigest,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GcReport {
    pub datastore: String,
    pub started_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    pub snapshots_total: usize,
    pub snapshots_corrupted: usize,
    pub snapshots_protected: usize,
    pub index_blobs_marked: usize,
    pub chunks_reachable: usize,
    pub chunks_scanned: usize,
    pub chunks_in_use: usize,
    pub chunks_recent: usize,
    /// Deleted chunks, or the chunks a dry run would delete.
    pub removed: Vec<ChunkDigest>,
    pub bytes_removed: u64,
    pub sweep_failures: Vec<SweepFailure>,
    /// Keys under the chunk prefix that are not chunk digests.
    pub skipped_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<GcPhase>,
}

impl GcReport {
    fn new(datastore: &str, started_at: DateTime<Utc>, cutoff: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            datastore: datastore.to_string(),
            started_at,
            cutoff,
            dry_run,
            snapshots_total: 0,
            snapshots_corrupted: 0,
            snapshots_protected: 0,
            index_blobs_marked: 0,
            chunks_reachable: 0,
            chunks_scanned: 0,
            chunks_in_use: 0,
            chunks_recent: 0,
            removed: Vec::new(),
            bytes_removed: 0,
            sweep_failures: Vec::new(),
            skipped_keys: 0,
            interrupted: None,
        }
    }

    pub fn completed(&self) -> bool {
        self.interrupted.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct SweepCandidate {
    digest: ChunkDigest,
    size: u64,
}

enum DeleteResult {
    Deleted(SweepCandidate),
    Failed(SweepCandidate, StowageError),
    Stopped,
}

pub struct GarbageCollector {
    catalog: Arc<SnapshotCatalog>,
    retention_window: Duration,
    concurrency: usize,
}

impl GarbageCollector {
    pub fn new(catalog: Arc<SnapshotCatalog>, retention_window: Duration, concurrency: usize) -> Self {
        Self {
            catalog,
            retention_window,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, request: GcRequest) -> Result<GcReport> {
        let GcRequest { dry_run, stop } = request;
        let datastore = self.catalog.layout().datastore().to_string();

        let started_at = Utc::now();
        let window = chrono::Duration::from_std(self.retention_window).map_err(|error| {
            StowageError::Config(format!("retention window out of range: {}", error))
        })?;
        let cutoff = started_at - window;
        let mut report = GcReport::new(&datastore, started_at, cutoff, dry_run);

        tracing::info!(
            "gc started. datastore={} cutoff={} dry_run={}",
            datastore,
            cutoff,
            dry_run
        );

        let entries = match self.catalog.scan(&stop).await {
            Ok(entries) => entries,
            Err(StowageError::Cancelled) => {
                tracing::warn!("gc interrupted during mark. datastore={}", datastore);
                report.interrupted = Some(GcPhase::Mark);
                return Ok(report);
            }
            Err(error) => return Err(error),
        };

        let reachable = mark(&entries, &mut report);
        tracing::info!(
            "gc mark finished. datastore={} snapshots={} corrupted={} protected={} reachable_chunks={}",
            datastore,
            report.snapshots_total,
            report.snapshots_corrupted,
            report.snapshots_protected,
            report.chunks_reachable
        );

        if stop.is_stopped() {
            tracing::warn!("gc interrupted before sweep. datastore={}", datastore);
            report.interrupted = Some(GcPhase::Sweep);
            return Ok(report);
        }

        self.sweep(&reachable, &stop, &mut report).await?;

        report.removed.sort();
        tracing::info!(
            "gc finished. datastore={} scanned={} removed={} bytes_removed={} failures={} skipped_keys={} interrupted={:?}",
            datastore,
            report.chunks_scanned,
            report.removed.len(),
            report.bytes_removed,
            report.sweep_failures.len(),
            report.skipped_keys,
            report.interrupted
        );
        Ok(report)
    }

    async fn sweep(
        &self,
        reachable: &HashSet<ChunkDigest>,
        stop: &StopSignal,
        report: &mut GcReport,
    ) -> Result<()> {
        let layout = self.catalog.layout();
        let store = self.catalog.store();

        let mut candidates = Vec::new();
        for object in store.list(&layout.chunk_prefix()).await? {
            let Some(digest) = layout.parse_chunk_key(&object.key) else {
                tracing::warn!("skipping non-chunk key {}", object.key);
                report.skipped_keys += 1;
                continue;
            };

            report.chunks_scanned += 1;
            if reachable.contains(&digest) {
                report.chunks_in_use += 1;
            } else if object.last_modified >= report.cutoff {
                report.chunks_recent += 1;
            } else {
                candidates.push(SweepCandidate {
                    digest,
                    size: object.size,
                });
            }
        }

        if report.dry_run {
            for candidate in candidates {
                tracing::debug!("dry run: would remove chunk {}", candidate.digest);
                report.removed.push(candidate.digest);
                report.bytes_removed += candidate.size;
            }
            return Ok(());
        }

        let results: Vec<DeleteResult> = stream::iter(candidates)
            .map(|candidate| async move {
                if stop.is_stopped() {
                    return DeleteResult::Stopped;
                }
                match store.delete(&layout.chunk_key(&candidate.digest)).await {
                    Ok(()) => DeleteResult::Deleted(candidate),
                    Err(error) => DeleteResult::Failed(candidate, error),
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                DeleteResult::Deleted(candidate) => {
                    tracing::debug!("removed chunk {}", candidate.digest);
                    report.removed.push(candidate.digest);
                    report.bytes_removed += candidate.size;
                }
                DeleteResult::Failed(candidate, error) => {
                    tracing::warn!(
                        "failed to remove chunk. digest={} error={}",
                        candidate.digest,
                        error
                    );
                    report.sweep_failures.push(SweepFailure {
                        digest: candidate.digest,
                        error: error.to_string(),
                    });
                }
                DeleteResult::Stopped => report.interrupted = Some(GcPhase::Sweep),
            }
        }
        Ok(())
    }
}

/// Reachable chunk set. Corrupted snapshots only count when protected, and
/// then only through the index blobs that decoded.
fn mark(entries: &[CatalogEntry], report: &mut GcReport) -> HashSet<ChunkDigest> {
    let mut reachable = HashSet::new();
    for entry in entries {
        let snapshot = &entry.snapshot;
        report.snapshots_total += 1;
        if snapshot.corrupted {
            report.snapshots_corrupted += 1;
        }
        if snapshot.protected {
            report.snapshots_protected += 1;
        }

        if snapshot.corrupted && !snapshot.protected {
            tracing::warn!(
                "corrupted snapshot contributes no chunks. snapshot={} reason={}",
                snapshot.id,
                snapshot.corruption.as_deref().unwrap_or("unknown")
            );
            continue;
        }

        for (_, index) in &entry.indexes {
            report.index_blobs_marked += 1;
            reachable.extend(index.digests());
        }
    }
    report.chunks_reachable = reachable.len();
    reachable
}
