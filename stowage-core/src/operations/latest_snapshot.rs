use crate::{GroupId, Result, Snapshot, SnapshotCatalog};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct LatestSnapshotOperation {
    catalog: Arc<SnapshotCatalog>,
}

#[derive(Debug, Clone)]
pub struct LatestSnapshotOperationRequest {
    pub group: GroupId,
    /// Defaults to now.
    pub not_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum LatestSnapshotOperationOutcome {
    Found(Snapshot),
    NotFound,
}

impl LatestSnapshotOperation {
    pub fn new(catalog: Arc<SnapshotCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn run(
        &self,
        request: LatestSnapshotOperationRequest,
    ) -> Result<LatestSnapshotOperationOutcome> {
        let LatestSnapshotOperationRequest { group, not_after } = request;
        let not_after = not_after.unwrap_or_else(Utc::now);

        match self.catalog.latest(&group, not_after).await? {
            Some(snapshot) => Ok(LatestSnapshotOperationOutcome::Found(snapshot)),
            None => {
                tracing::debug!("no snapshot of {} at or before {}", group, not_after);
                Ok(LatestSnapshotOperationOutcome::NotFound)
            }
        }
    }
}
