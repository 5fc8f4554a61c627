use super::{ObjectEntry, ObjectStoreAdapter, TagSet};
use crate::config::RetryConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retries transient transport failures of the wrapped adapter with
/// exponential backoff plus jitter. Anything else is returned at once.
pub struct RetryingStore {
    inner: Arc<dyn ObjectStoreAdapter>,
    config: RetryConfig,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn ObjectStoreAdapter>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn retry<T, F, Fut>(&self, op_name: &str, key: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay_ms = self.config.retry_delay_ms;
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "{} {} {}: transient error (attempt {}/{}), retrying: {}",
                        self.inner.name(),
                        op_name,
                        key,
                        attempt,
                        self.config.max_retries,
                        error
                    );

                    let jitter = rand::random::<u64>() % delay_ms.max(1);
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(self.config.retry_max_delay_ms);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl ObjectStoreAdapter for RetryingStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.retry("put", key, || self.inner.put(key, data.clone()))
            .await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.retry("get", key, || self.inner.get(key)).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectEntry>> {
        self.retry("head", key, || self.inner.head(key)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        self.retry("list", prefix, || self.inner.list(prefix)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.retry("delete", key, || self.inner.delete(key)).await
    }

    async fn get_tags(&self, key: &str) -> Result<TagSet> {
        self.retry("get_tags", key, || self.inner.get_tags(key))
            .await
    }

    async fn put_tags(&self, key: &str, tags: &TagSet) -> Result<()> {
        self.retry("put_tags", key, || self.inner.put_tags(key, tags))
            .await
    }

    fn supports_tagging(&self) -> bool {
        self.inner.supports_tagging()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
