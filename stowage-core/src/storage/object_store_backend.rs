use super::s3_tagging::S3TagClient;
use super::{ObjectEntry, ObjectStoreAdapter, TagSet};
use crate::config::S3Config;
use crate::error::{Result, StowageError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use std::sync::Arc;

/// Adapter over an `object_store` backend (S3, local filesystem, in-memory).
///
/// On S3, tags are read and written through [`S3TagClient`]. The other
/// backends have no tags; their tag calls fail with `Unsupported`.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    inner: Arc<dyn ObjectStore>,
    tagging: Option<Arc<S3TagClient>>,
    name: String,
}

impl ObjectStoreBackend {
    pub fn new(inner: Arc<dyn ObjectStore>, name: impl Into<String>) -> Self {
        Self {
            inner,
            tagging: None,
            name: name.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "object_store:memory")
    }

    pub fn local(path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let store = LocalFileSystem::new_with_prefix(path)?;
        Ok(Self::new(
            Arc::new(store),
            format!("local:{}", path.display()),
        ))
    }

    pub fn s3(config: &S3Config) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(StowageError::Config("s3 bucket cannot be empty".to_string()));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = config.endpoint.as_deref() {
            builder = builder.with_endpoint(endpoint);
        }

        if let Some(credentials) = config.credentials.as_ref() {
            builder = builder
                .with_access_key_id(&credentials.access_key_id)
                .with_secret_access_key(&credentials.secret_access_key);
        }

        let store = builder
            .build()
            .map_err(|error| StowageError::Config(format!("invalid s3 config: {}", error)))?;
        Ok(Self {
            inner: Arc::new(store),
            tagging: Some(Arc::new(S3TagClient::new(config.clone()))),
            name: format!("s3:{}", config.bucket),
        })
    }

    fn tagging_unsupported(&self) -> StowageError {
        StowageError::Unsupported(format!("object tagging on {}", self.name))
    }
}

fn object_path(key: &str) -> Result<Path> {
    Path::parse(key)
        .map_err(|error| StowageError::InvalidRequest(format!("invalid object key {}: {}", key, error)))
}

fn to_entry(meta: object_store::ObjectMeta) -> ObjectEntry {
    ObjectEntry {
        key: meta.location.to_string(),
        size: meta.size as u64,
        last_modified: meta.last_modified,
    }
}

#[async_trait]
impl ObjectStoreAdapter for ObjectStoreBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner.put(&object_path(key)?, data.into()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self.inner.get(&object_path(key)?).await?;
        Ok(result.bytes().await?)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectEntry>> {
        match self.inner.head(&object_path(key)?).await {
            Ok(meta) => Ok(Some(to_entry(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let prefix_path = object_path(prefix.trim_end_matches('/'))?;
        let metas: Vec<object_store::ObjectMeta> =
            match self.inner.list(Some(&prefix_path)).try_collect().await {
                Ok(metas) => metas,
                // local filesystem reports a missing directory instead of an empty listing
                Err(object_store::Error::NotFound { .. }) => Vec::new(),
                Err(error) => return Err(error.into()),
            };

        let mut entries: Vec<ObjectEntry> = metas
            .into_iter()
            .map(to_entry)
            .filter(|entry| entry.key.starts_with(prefix))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.inner.delete(&object_path(key)?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn get_tags(&self, key: &str) -> Result<TagSet> {
        match self.tagging.as_ref() {
            Some(client) => client.get_tags(key).await,
            None => Err(self.tagging_unsupported()),
        }
    }

    async fn put_tags(&self, key: &str, tags: &TagSet) -> Result<()> {
        match self.tagging.as_ref() {
            Some(client) => client.put_tags(key, tags).await,
            None => Err(self.tagging_unsupported()),
        }
    }

    fn supports_tagging(&self) -> bool {
        self.tagging.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
