use crate::{GroupId, Result, Snapshot, SnapshotCatalog};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ListSnapshotsOperation {
    catalog: Arc<SnapshotCatalog>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSnapshotsOperationRequest {
    /// Restrict the listing to one group.
    pub group: Option<GroupId>,
    pub include_corrupted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSnapshotsOperationResult {
    pub datastore: String,
    pub snapshots: Vec<Snapshot>,
}

impl ListSnapshotsOperation {
    pub fn new(catalog: Arc<SnapshotCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn run(
        &self,
        request: ListSnapshotsOperationRequest,
    ) -> Result<ListSnapshotsOperationResult> {
        let ListSnapshotsOperationRequest {
            group,
            include_corrupted,
        } = request;

        let snapshots = match group {
            Some(group) => self.catalog.list_group(&group, include_corrupted).await?,
            None => self.catalog.list(include_corrupted).await?,
        };

        Ok(ListSnapshotsOperationResult {
            datastore: self.catalog.layout().datastore().to_string(),
            snapshots,
        })
    }
}
