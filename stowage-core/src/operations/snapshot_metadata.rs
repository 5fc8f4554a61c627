use crate::{MetadataUpdate, MetadataWriteOutcome, Result, SnapshotCatalog, SnapshotId, SnapshotMetadata};
use std::sync::Arc;

#[derive(Clone)]
pub struct SnapshotMetadataOperation {
    catalog: Arc<SnapshotCatalog>,
}

#[derive(Debug, Clone)]
pub struct ReadMetadataOperationRequest {
    pub snapshot: SnapshotId,
}

#[derive(Debug, Clone)]
pub struct WriteMetadataOperationRequest {
    pub snapshot: SnapshotId,
    pub update: MetadataUpdate,
}

impl SnapshotMetadataOperation {
    pub fn new(catalog: Arc<SnapshotCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn run_read(&self, request: ReadMetadataOperationRequest) -> Result<SnapshotMetadata> {
        self.catalog.read_metadata(&request.snapshot).await
    }

    pub async fn run_write(
        &self,
        request: WriteMetadataOperationRequest,
    ) -> Result<MetadataWriteOutcome> {
        let WriteMetadataOperationRequest { snapshot, update } = request;
        let outcome = self.catalog.write_metadata(&snapshot, &update).await?;
        if let MetadataWriteOutcome::Applied(metadata) = &outcome {
            tracing::info!(
                "snapshot metadata updated. datastore={} snapshot={} protected={}",
                self.catalog.layout().datastore(),
                snapshot,
                metadata.protected
            );
        }
        Ok(outcome)
    }
}
