//! Filesystem-backed blob store: one directory per bucket under a root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{BlobError, BlobStore};

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `bucket/key` under the root, rejecting anything that could
    /// escape it.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobError> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            if part.is_empty()
                || relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(BlobError::InvalidKey(format!("{bucket}/{key}")));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Bytes::from(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::not_found(bucket, key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), BlobError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        debug!(bucket, key, content_type, bytes = body.len(), "object written");
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BlobError> {
        for key in keys {
            let path = self.object_path(bucket, key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(bucket, key = %key, "object deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let path = self.object_path(bucket, key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());

        store
            .put_object("static", "videos/m/q/web.mp4", Bytes::from_static(b"abc"), "video/mp4")
            .await
            .expect("put");
        assert!(store.exists("static", "videos/m/q/web.mp4").await.expect("exists"));
        assert_eq!(
            store.get_object("static", "videos/m/q/web.mp4").await.expect("get"),
            Bytes::from_static(b"abc")
        );

        store
            .delete_objects("static", &["videos/m/q/web.mp4".into(), "videos/m/q/missing.mp4".into()])
            .await
            .expect("delete ignores missing keys");
        let err = store.get_object("static", "videos/m/q/web.mp4").await.expect_err("gone");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn presigned_uploads_are_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        let err = store
            .presign_put("uploads", "mentor-1/id", "video/mp4", 10, std::time::Duration::from_secs(60))
            .await
            .expect_err("local store cannot sign");
        assert!(matches!(err, BlobError::Unsupported(_)));
    }

    #[tokio::test]
    async fn rejects_keys_escaping_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        for key in ["../etc/passwd", "/abs/key", ""] {
            let err = store.get_object("static", key).await.expect_err("must reject");
            assert!(matches!(err, BlobError::InvalidKey(_)), "{key}");
        }
    }
}
