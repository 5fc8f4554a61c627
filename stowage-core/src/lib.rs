//! Stowage Core - content-addressed backup storage on object stores
//!
//! Backup data lives in an object store as:
//! - SHA256 content-addressed chunks, shared across snapshots
//! - index blobs listing the chunks of one archive
//! - a manifest per snapshot, written last as the commit marker
//!
//! Snapshot `protected`/`note` attributes are kept in object tags when the
//! backend supports them. A mark-and-sweep collector removes chunks that no
//! snapshot references once they are older than the retention window.

pub mod backup;
pub mod cancel;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod gc;
pub mod layout;
pub mod metadata;
pub mod model;
pub mod operations;
pub mod restore;
pub mod storage;

pub use backup::{BackupStats, BackupWriter, ChunkUpload};
pub use cancel::StopSignal;
pub use catalog::{CatalogEntry, SnapshotCatalog};
pub use codec::{decode_index, decode_manifest, encode_index, encode_manifest};
pub use config::{
    DEFAULT_CONCURRENCY, DEFAULT_RETENTION_WINDOW_SECS, DatastoreConfig, LocalConfig, RetryConfig,
    S3Config, S3Credentials, StorageBackendKind, StorageConfig,
};
pub use digest::ChunkDigest;
pub use error::{Result, StowageError};
pub use gc::{GarbageCollector, GcPhase, GcReport, GcRequest, SweepFailure};
pub use layout::DatastoreLayout;
pub use metadata::{
    DisabledMetadataProvider, MetadataProvider, MetadataWriteOutcome, TaggingMetadataProvider,
    build_metadata_provider,
};
pub use model::{
    ArchiveRef, BackupType, ChunkEntry, ChunkIndex, GroupId, GroupSummary, MetadataUpdate, Snapshot,
    SnapshotId, SnapshotManifest, SnapshotMetadata,
};
pub use restore::RestoreReader;
pub use storage::{
    MemoryObjectStore, ObjectEntry, ObjectStoreAdapter, ObjectStoreBackend, RetryingStore,
    StoreBuilder, TagSet,
};
