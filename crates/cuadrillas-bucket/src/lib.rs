//! S3-compatible blob storage for field-report photos.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub const PHOTO_PREFIX: &str = "events/";
pub const DEFAULT_PHOTO_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    /// Overrides the URL prefix handed back for uploaded objects.
    pub public_base_url: Option<String>,
    /// Upload objects with a `public-read` ACL.
    pub public_read: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            public_base_url: None,
            public_read: true,
        }
    }
}

impl S3Config {
    /// Public URL of `key`, honouring the base-URL override and path-style endpoints.
    pub fn object_url(&self, key: &str) -> String {
        if let Some(base) = &self.public_base_url {
            return format!("{}/{key}", base.trim_end_matches('/'));
        }
        match &self.endpoint {
            Some(endpoint) if self.force_path_style => {
                format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket)
            }
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                match endpoint.split_once("://") {
                    Some((scheme, host)) => format!("{scheme}://{}.{host}/{key}", self.bucket),
                    None => format!("{}/{}/{key}", endpoint, self.bucket),
                }
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{key}",
                self.bucket, self.region
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError>;
    async fn delete_object(&self, key: &str) -> Result<(), BucketError>;
    fn public_url(&self, key: &str) -> String;
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
    config: S3Config,
}

impl S3BucketStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.bucket.is_empty() {
            return Err(BucketError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client, config })
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(bytes.into())
            .content_type(content_type);
        if self.config.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        request.send().await.map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        self.config.object_url(key)
    }
}

/// Object key for a photo: `events/<random hex>` plus the hint's extension.
pub fn photo_key(filename_hint: Option<&str>) -> String {
    let extension = filename_hint
        .and_then(|hint| hint.rsplit_once('.'))
        .map(|(_, ext)| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("{PHOTO_PREFIX}{}{extension}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPhoto {
    pub key: String,
    pub url: String,
}

/// Stores a photo under a fresh key.
pub async fn upload_photo(
    store: &dyn BucketStore,
    bytes: Bytes,
    content_type: Option<&str>,
    filename_hint: Option<&str>,
) -> Result<StoredPhoto, BucketError> {
    let key = photo_key(filename_hint);
    let content_type = content_type
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(DEFAULT_PHOTO_CONTENT_TYPE);

    store.put_object(&key, bytes, content_type).await?;
    tracing::debug!(key = %key, content_type, "photo uploaded");
    let url = store.public_url(&key);
    Ok(StoredPhoto { key, url })
}
