use super::{MetadataProvider, MetadataWriteOutcome, NOTE_TAG, PROTECTED_TAG};
use crate::error::{Result, StowageError};
use crate::model::{MetadataUpdate, SnapshotMetadata};
use crate::storage::{ObjectStoreAdapter, TagSet};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;

/// Keeps `protected` and `note` in the object tags of the snapshot manifest.
///
/// Every failed tag call is returned as `MetadataUnavailable`. A write never
/// proceeds from a failed read: merging into an assumed-empty tag set would
/// erase whatever the object really carries.
pub struct TaggingMetadataProvider {
    store: Arc<dyn ObjectStoreAdapter>,
}

impl TaggingMetadataProvider {
    pub fn new(store: Arc<dyn ObjectStoreAdapter>) -> Self {
        Self { store }
    }

    async fn fetch_tags(&self, key: &str) -> Result<TagSet> {
        self.store
            .get_tags(key)
            .await
            .map_err(|error| unavailable(key, &error))
    }
}

fn unavailable(key: &str, error: &StowageError) -> StowageError {
    StowageError::MetadataUnavailable {
        key: key.to_string(),
        reason: error.to_string(),
    }
}

pub fn decode_tags(key: &str, tags: &TagSet) -> Result<SnapshotMetadata> {
    let protected = tags
        .get(PROTECTED_TAG)
        .is_some_and(|value| value == "true");

    let note = match tags.get(NOTE_TAG) {
        Some(encoded) => {
            let raw = STANDARD
                .decode(encoded)
                .map_err(|error| StowageError::MetadataUnavailable {
                    key: key.to_string(),
                    reason: format!("note tag is not valid base64: {}", error),
                })?;
            String::from_utf8(raw).map_err(|error| StowageError::MetadataUnavailable {
                key: key.to_string(),
                reason: format!("note tag is not valid UTF-8: {}", error),
            })?
        }
        None => String::new(),
    };

    Ok(SnapshotMetadata { protected, note })
}

/// Apply `update` to `tags`, leaving unrelated tags untouched.
pub fn merge_tags(tags: &mut TagSet, update: &MetadataUpdate) {
    match update.protected {
        Some(true) => {
            tags.insert(PROTECTED_TAG.to_string(), "true".to_string());
        }
        Some(false) => {
            tags.remove(PROTECTED_TAG);
        }
        None => {}
    }

    match update.note.as_deref() {
        Some("") => {
            tags.remove(NOTE_TAG);
        }
        Some(note) => {
            tags.insert(NOTE_TAG.to_string(), STANDARD.encode(note.as_bytes()));
        }
        None => {}
    }
}

#[async_trait]
impl MetadataProvider for TaggingMetadataProvider {
    async fn read(&self, key: &str) -> Result<SnapshotMetadata> {
        let tags = self.fetch_tags(key).await?;
        decode_tags(key, &tags)
    }

    async fn write(&self, key: &str, update: &MetadataUpdate) -> Result<MetadataWriteOutcome> {
        let mut tags = self.fetch_tags(key).await?;
        let current = decode_tags(key, &tags)?;
        if update.is_empty() {
            return Ok(MetadataWriteOutcome::Applied(current));
        }

        merge_tags(&mut tags, update);
        self.store
            .put_tags(key, &tags)
            .await
            .map_err(|error| unavailable(key, &error))?;

        let written = decode_tags(key, &tags)?;
        tracing::debug!(
            "metadata written. key={} protected={} note_len={}",
            key,
            written.protected,
            written.note.len()
        );
        Ok(MetadataWriteOutcome::Applied(written))
    }

    fn enabled(&self) -> bool {
        true
    }
}
