use super::{MemoryObjectStore, ObjectStoreAdapter, ObjectStoreBackend, RetryingStore};
use crate::config::{RetryConfig, StorageBackendKind, StorageConfig};
use crate::error::{Result, StowageError};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    config: Option<StorageConfig>,
    local_path: Option<PathBuf>,
    retry: Option<RetryConfig>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides `local.path` from the storage config.
    pub fn local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    fn resolve_local_path(&self, config: &StorageConfig) -> Result<PathBuf> {
        let path = self
            .local_path
            .clone()
            .or_else(|| config.local.as_ref().map(|local| local.path.clone()))
            .ok_or_else(|| {
                StowageError::Config("local.path is required for local backend".to_string())
            })?;

        if path.as_os_str().is_empty() {
            return Err(StowageError::Config(
                "local.path cannot be empty for local backend".to_string(),
            ));
        }

        Ok(path)
    }

    pub fn build(&self) -> Result<Arc<dyn ObjectStoreAdapter>> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StowageError::Config("storage configuration is required".to_string()))?;

        let backend: Arc<dyn ObjectStoreAdapter> = match config.backend {
            StorageBackendKind::Memory => Arc::new(MemoryObjectStore::new()),
            StorageBackendKind::Local => {
                let path = self.resolve_local_path(config)?;
                Arc::new(ObjectStoreBackend::local(&path)?)
            }
            StorageBackendKind::S3 => {
                let s3 = config.s3.as_ref().ok_or_else(|| {
                    StowageError::Config("s3 configuration is required for s3 backend".to_string())
                })?;
                Arc::new(ObjectStoreBackend::s3(s3)?)
            }
        };

        let retry = self.retry.clone().unwrap_or_else(|| config.retry.clone());
        tracing::debug!(
            "Built {} object store (max_retries={})",
            backend.name(),
            retry.max_retries
        );
        Ok(Arc::new(RetryingStore::new(backend, retry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalConfig, S3Config};

    fn storage_config(backend: StorageBackendKind) -> StorageConfig {
        StorageConfig {
            backend,
            local: None,
            s3: None,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn test_build_requires_config() {
        assert!(matches!(
            StoreBuilder::new().build(),
            Err(StowageError::Config(_))
        ));
    }

    #[test]
    fn test_memory_backend_supports_tagging() {
        let store = StoreBuilder::new()
            .config(storage_config(StorageBackendKind::Memory))
            .build()
            .unwrap();
        assert!(store.supports_tagging());
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_local_backend_requires_path() {
        let result = StoreBuilder::new()
            .config(storage_config(StorageBackendKind::Local))
            .build();
        assert!(matches!(result, Err(StowageError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let mut config = storage_config(StorageBackendKind::Local);
        config.local = Some(LocalConfig {
            path: dir.path().join("objects"),
        });
        let store = StoreBuilder::new().config(config).build().unwrap();
        assert!(!store.supports_tagging());
    }

    #[test]
    fn test_s3_backend_requires_section() {
        let result = StoreBuilder::new()
            .config(storage_config(StorageBackendKind::S3))
            .build();
        assert!(matches!(result, Err(StowageError::Config(_))));

        let mut config = storage_config(StorageBackendKind::S3);
        config.s3 = Some(S3Config {
            bucket: " ".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            credentials: None,
            allow_http: false,
        });
        let result = StoreBuilder::new().config(config).build();
        assert!(matches!(result, Err(StowageError::Config(_))));
    }

    #[test]
    fn test_s3_backend_supports_tagging() {
        let mut config = storage_config(StorageBackendKind::S3);
        config.s3 = Some(S3Config {
            bucket: "backups".to_string(),
            region: "us-east-1".to_string(),
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            credentials: None,
            allow_http: true,
        });
        let store = StoreBuilder::new().config(config).build().unwrap();
        assert!(store.supports_tagging());
        assert!(crate::metadata::build_metadata_provider(store, "store1", true).is_ok());
    }
}
