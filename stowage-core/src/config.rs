use crate::error::{Result, StowageError};
use crate::layout::DatastoreLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 24h plus a five minute margin for clock skew between writers and the
/// collector.
pub const DEFAULT_RETENTION_WINDOW_SECS: u64 = 24 * 60 * 60 + 5 * 60;
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    pub name: String,
    #[serde(default = "default_retention_window_secs")]
    pub retention_window_secs: u64,
    #[serde(default)]
    pub tagging_enabled: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl DatastoreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retention_window_secs: DEFAULT_RETENTION_WINDOW_SECS,
            tagging_enabled: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_secs)
    }

    pub fn layout(&self) -> Result<DatastoreLayout> {
        DatastoreLayout::new(self.name.clone())
    }

    pub fn validate(&self) -> Result<()> {
        self.layout()?;
        if self.concurrency == 0 {
            return Err(StowageError::Config(format!(
                "datastore '{}': concurrency must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_retention_window_secs() -> u64 {
    DEFAULT_RETENTION_WINDOW_SECS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    #[serde(default)]
    pub local: Option<LocalConfig>,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credentials: Option<S3Credentials>,
    #[serde(default)]
    pub allow_http: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datastore_defaults_from_json() {
        let config: DatastoreConfig = serde_json::from_str(r#"{"name":"store1"}"#).unwrap();
        assert_eq!(config.retention_window_secs, DEFAULT_RETENTION_WINDOW_SECS);
        assert!(!config.tagging_enabled);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_datastore_validation() {
        let mut config = DatastoreConfig::new("store1");
        config.concurrency = 0;
        assert!(config.validate().is_err());
        assert!(DatastoreConfig::new("a/b").validate().is_err());
    }

    #[test]
    fn test_storage_config_backend_names() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"backend":"s3","s3":{"bucket":"b","region":"us-east-1"}}"#)
                .unwrap();
        assert_eq!(config.backend, StorageBackendKind::S3);
        assert_eq!(config.retry.max_retries, 3);
        assert!(!config.s3.unwrap().allow_http);
    }
}
