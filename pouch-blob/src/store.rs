use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{BlobError, BlobResult};

/// Durable object storage. Objects are immutable once written; finalize
/// writes them, the completion worker presigns reads against them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object. Overwriting the same bucket/key is allowed and
    /// last-write-wins.
    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> BlobResult<()>;

    /// Fetch an object.
    async fn get(&self, bucket: &str, key: &str) -> BlobResult<Bytes>;

    /// Delete an object. Missing objects are not an error.
    async fn delete(&self, bucket: &str, key: &str) -> BlobResult<()>;

    /// Generate a time-limited, credential-free read URL.
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration)
        -> BlobResult<PresignedUrl>;
}

/// A signed read URL plus its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

fn signature() -> String {
    let mut raw = [0u8; 16];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// In-memory object store for tests and development.
pub struct MemoryObjectStore {
    base_url: String,
    objects: RwLock<HashMap<(String, String), Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_base_url("https://objects.local")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored objects (test observability).
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> BlobResult<()> {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> BlobResult<Bytes> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::not_found(format!("{}/{}", bucket, key)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> BlobResult<()> {
        self.objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> BlobResult<PresignedUrl> {
        if !self
            .objects
            .read()
            .contains_key(&(bucket.to_string(), key.to_string()))
        {
            return Err(BlobError::not_found(format!("{}/{}", bucket, key)));
        }

        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let url = format!(
            "{}/{}/{}?expires={}&sig={}",
            self.base_url,
            bucket,
            key,
            expires_at.timestamp(),
            signature()
        );
        Ok(PresignedUrl { url, expires_at })
    }
}

/// Filesystem-backed object store: one directory per bucket.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> BlobResult<()> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> BlobResult<Bytes> {
        let path = self.path_for(bucket, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::not_found(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> BlobResult<()> {
        let path = self.path_for(bucket, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> BlobResult<PresignedUrl> {
        let path = self.path_for(bucket, key);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(BlobError::not_found(format!("{}/{}", bucket, key)));
        }

        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let url = format!(
            "file://{}?expires={}&sig={}",
            path.display(),
            expires_at.timestamp(),
            signature()
        );
        Ok(PresignedUrl { url, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = MemoryObjectStore::new();
        store
            .put("avatars", "tok/a.png", Bytes::from_static(b"img"))
            .await
            .unwrap();

        assert_eq!(store.get("avatars", "tok/a.png").await.unwrap().as_ref(), b"img");

        store.delete("avatars", "tok/a.png").await.unwrap();
        assert!(store
            .get("avatars", "tok/a.png")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn presign_carries_ttl() {
        let store = MemoryObjectStore::new();
        store
            .put("backgrounds", "tok/c.png", Bytes::from_static(b"img"))
            .await
            .unwrap();

        let before = Utc::now();
        let signed = store
            .presign_get("backgrounds", "tok/c.png", Duration::from_secs(300))
            .await
            .unwrap();

        assert!(signed.url.contains("backgrounds/tok/c.png"));
        assert!(signed.url.contains("sig="));
        assert!(signed.expires_at >= before + chrono::Duration::seconds(299));
    }

    #[tokio::test]
    async fn presign_unknown_object_fails() {
        let store = MemoryObjectStore::new();
        let err = store
            .presign_get("avatars", "missing", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
