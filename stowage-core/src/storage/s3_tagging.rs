//! Object tagging on S3.
//!
//! `object_store` has no tagging API, so tag reads and writes go through the
//! AWS SDK client. The client is built on first use from the same bucket,
//! region, endpoint and credentials as the data path.

use super::TagSet;
use crate::config::S3Config;
use crate::error::{Result, StowageError};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{Tag, Tagging};
use tokio::sync::OnceCell;

pub struct S3TagClient {
    config: S3Config,
    client: OnceCell<S3Client>,
}

impl S3TagClient {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &S3Client {
        self.client
            .get_or_init(|| build_client(&self.config))
            .await
    }

    pub async fn get_tags(&self, key: &str) -> Result<TagSet> {
        let output = self
            .client()
            .await
            .get_object_tagging()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| map_sdk_error("get object tagging", key, error))?;
        Ok(from_sdk_tags(output.tag_set()))
    }

    pub async fn put_tags(&self, key: &str, tags: &TagSet) -> Result<()> {
        let tagging = Tagging::builder()
            .set_tag_set(Some(to_sdk_tags(tags)?))
            .build()
            .map_err(|error| {
                StowageError::InvalidRequest(format!("invalid tag set for {}: {}", key, error))
            })?;

        self.client()
            .await
            .put_object_tagging()
            .bucket(&self.config.bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|error| map_sdk_error("put object tagging", key, error))?;
        Ok(())
    }
}

async fn build_client(config: &S3Config) -> S3Client {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
    if let Some(endpoint) = config.endpoint.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(credentials) = config.credentials.as_ref() {
        loader = loader.credentials_provider(Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            "stowage-config",
        ));
    }
    let shared = loader.load().await;

    // custom endpoints (MinIO, Ceph) are addressed path-style, like object_store does
    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.endpoint.is_some())
        .build();

    tracing::debug!(
        "Built S3 tagging client (bucket={}, region={})",
        config.bucket,
        config.region
    );
    S3Client::from_conf(s3_config)
}

fn map_sdk_error<E>(operation: &str, key: &str, error: SdkError<E>) -> StowageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if error.as_service_error().and_then(|service| service.code()) == Some("NoSuchKey") {
        return StowageError::ObjectNotFound(key.to_string());
    }
    StowageError::Transport(format!(
        "{} {}: {}",
        operation,
        key,
        DisplayErrorContext(&error)
    ))
}

fn from_sdk_tags(tags: &[Tag]) -> TagSet {
    tags.iter()
        .map(|tag| (tag.key().to_string(), tag.value().to_string()))
        .collect()
}

fn to_sdk_tags(tags: &TagSet) -> Result<Vec<Tag>> {
    tags.iter()
        .map(|(key, value)| {
            Tag::builder().key(key).value(value).build().map_err(|error| {
                StowageError::InvalidRequest(format!("invalid tag {}: {}", key, error))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_conversion() {
        let mut tags = TagSet::new();
        tags.insert("protected".to_string(), "true".to_string());
        tags.insert("note".to_string(), "cHJlLXVwZ3JhZGU=".to_string());

        let sdk_tags = to_sdk_tags(&tags).unwrap();
        assert_eq!(sdk_tags.len(), 2);
        assert_eq!(sdk_tags[0].key(), "note");
        assert_eq!(from_sdk_tags(&sdk_tags), tags);
    }

    #[test]
    fn test_empty_tag_set() {
        assert!(to_sdk_tags(&TagSet::new()).unwrap().is_empty());
        assert!(from_sdk_tags(&[]).is_empty());
    }
}
