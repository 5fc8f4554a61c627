//! Object store adapters for Stowage
//!
//! Everything the core reads or writes goes through [`ObjectStoreAdapter`].

pub mod factory;
pub mod memory;
pub mod object_store_backend;
pub mod retry;
pub mod s3_tagging;

pub use factory::StoreBuilder;
pub use memory::MemoryObjectStore;
pub use object_store_backend::ObjectStoreBackend;
pub use retry::RetryingStore;
pub use s3_tagging::S3TagClient;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub type TagSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStoreAdapter: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Fails with `ObjectNotFound` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn head(&self, key: &str) -> Result<Option<ObjectEntry>>;

    /// Every object whose key starts with `prefix`. Prefixes passed by the
    /// core always end with `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn get_tags(&self, key: &str) -> Result<TagSet>;

    /// Replaces the whole tag set of `key`.
    async fn put_tags(&self, key: &str, tags: &TagSet) -> Result<()>;

    fn supports_tagging(&self) -> bool;

    fn name(&self) -> &str;
}
