//! Object storage client.

pub mod local;
pub mod s3;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("s3 error: {0}")]
    S3(String),

    /// The backend cannot perform this operation at all.
    #[error("unsupported by this blob store: {0}")]
    Unsupported(String),
}

impl BlobError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        BlobError::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

/// A signed request that lets a client put one object without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignedUpload {
    pub url: String,
    pub method: String,
    /// Headers the client must send unchanged.
    pub headers: BTreeMap<String, String>,
}

/// Upload/download/delete against object storage. Overwrites are
/// last-write-wins; no versioning is assumed.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), BlobError>;

    /// Delete every key. Keys that do not exist are ignored.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BlobError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError>;

    /// Sign a PUT of exactly `content_length` bytes to `bucket/key`, valid
    /// for `expires_in`.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> Result<PresignedUpload, BlobError> {
        let _ = (content_type, content_length, expires_in);
        Err(BlobError::Unsupported(format!("presigned upload to {bucket}/{key}")))
    }

    async fn download_to(&self, bucket: &str, key: &str, path: &Path) -> Result<(), BlobError> {
        let body = self.get_object(bucket, key).await?;
        tokio::fs::write(path, &body).await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), BlobError> {
        let body = tokio::fs::read(path).await?;
        self.put_object(bucket, key, Bytes::from(body), content_type).await
    }
}
