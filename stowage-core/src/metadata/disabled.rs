use super::{MetadataProvider, MetadataWriteOutcome};
use crate::error::Result;
use crate::model::{MetadataUpdate, SnapshotMetadata};
use async_trait::async_trait;

/// Provider for datastores without tagging: reads are empty, writes are
/// dropped with a warning for the caller to surface.
#[derive(Debug, Clone)]
pub struct DisabledMetadataProvider {
    datastore: String,
}

impl DisabledMetadataProvider {
    pub fn new(datastore: impl Into<String>) -> Self {
        Self {
            datastore: datastore.into(),
        }
    }
}

#[async_trait]
impl MetadataProvider for DisabledMetadataProvider {
    async fn read(&self, _key: &str) -> Result<SnapshotMetadata> {
        Ok(SnapshotMetadata::default())
    }

    async fn write(&self, key: &str, _update: &MetadataUpdate) -> Result<MetadataWriteOutcome> {
        tracing::debug!(
            "metadata write skipped: tagging disabled. datastore={} key={}",
            self.datastore,
            key
        );
        Ok(MetadataWriteOutcome::Degraded {
            warning: format!(
                "object tagging is disabled for datastore '{}'; protected flag and notes are not persisted",
                self.datastore
            ),
        })
    }

    fn enabled(&self) -> bool {
        false
    }
}
