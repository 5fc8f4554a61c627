//! `protected` / `note` attributes of snapshots.
//!
//! The provider is chosen once, when a datastore is opened. Nothing outside
//! this module calls the adapter's tagging API.

pub mod disabled;
pub mod tagging;

pub use disabled::DisabledMetadataProvider;
pub use tagging::TaggingMetadataProvider;

use crate::error::{Result, StowageError};
use crate::model::{MetadataUpdate, SnapshotMetadata};
use crate::storage::ObjectStoreAdapter;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub const PROTECTED_TAG: &str = "protected";
pub const NOTE_TAG: &str = "note";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MetadataWriteOutcome {
    Applied(SnapshotMetadata),
    /// The backend cannot persist metadata; nothing was written.
    Degraded { warning: String },
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn read(&self, key: &str) -> Result<SnapshotMetadata>;

    async fn write(&self, key: &str, update: &MetadataUpdate) -> Result<MetadataWriteOutcome>;

    fn enabled(&self) -> bool;
}

/// Select the provider for a datastore.
///
/// Enabling tagging on a backend that cannot tag objects is a configuration
/// error rather than a stream of per-call failures.
pub fn build_metadata_provider(
    store: Arc<dyn ObjectStoreAdapter>,
    datastore: &str,
    tagging_enabled: bool,
) -> Result<Arc<dyn MetadataProvider>> {
    if !tagging_enabled {
        return Ok(Arc::new(DisabledMetadataProvider::new(datastore)));
    }

    if !store.supports_tagging() {
        return Err(StowageError::Config(format!(
            "datastore '{}': tagging enabled but {} does not support object tagging",
            datastore,
            store.name()
        )));
    }

    Ok(Arc::new(TaggingMetadataProvider::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, ObjectStoreBackend};

    #[test]
    fn test_disabled_when_tagging_off() {
        let store = Arc::new(MemoryObjectStore::new());
        let provider = build_metadata_provider(store, "store1", false).unwrap();
        assert!(!provider.enabled());
    }

    #[test]
    fn test_tagging_requires_backend_support() {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        assert!(matches!(
            build_metadata_provider(store, "store1", true),
            Err(StowageError::Config(_))
        ));

        let store = Arc::new(MemoryObjectStore::new());
        let provider = build_metadata_provider(store, "store1", true).unwrap();
        assert!(provider.enabled());
    }
}
