pub mod garbage_collect;
pub mod latest_snapshot;
pub mod list_snapshots;
pub mod snapshot_metadata;

pub use garbage_collect::{
    GarbageCollectOperation, GarbageCollectOperationRequest, GarbageCollectOperationResult,
};
pub use latest_snapshot::{
    LatestSnapshotOperation, LatestSnapshotOperationOutcome, LatestSnapshotOperationRequest,
};
pub use list_snapshots::{
    ListSnapshotsOperation, ListSnapshotsOperationRequest, ListSnapshotsOperationResult,
};
pub use snapshot_metadata::{
    ReadMetadataOperationRequest, SnapshotMetadataOperation, WriteMetadataOperationRequest,
};
