use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;

use crate::error::{BlobError, BlobResult};

/// Mutable byte sink for in-flight upload sessions.
///
/// One staged blob per key; `append` returns the new total length so the
/// caller can track the offset atomically with the write. `remove` is
/// idempotent: reclaiming a blob that is already gone succeeds.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Create an empty staged blob.
    async fn create(&self, key: &str) -> BlobResult<()>;

    /// Append bytes, returning the new total length.
    async fn append(&self, key: &str, bytes: Bytes) -> BlobResult<u64>;

    /// Current length of the staged blob.
    async fn len(&self, key: &str) -> BlobResult<u64>;

    /// Read the whole staged blob (finalize path).
    async fn read(&self, key: &str) -> BlobResult<Bytes>;

    /// Reclaim the staged blob. Missing blobs are not an error.
    async fn remove(&self, key: &str) -> BlobResult<()>;
}

/// In-memory staging for tests and development.
#[derive(Default)]
pub struct MemoryStagingStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn create(&self, key: &str) -> BlobResult<()> {
        self.blobs.write().entry(key.to_string()).or_default();
        Ok(())
    }

    async fn append(&self, key: &str, bytes: Bytes) -> BlobResult<u64> {
        let mut blobs = self.blobs.write();
        let blob = blobs
            .get_mut(key)
            .ok_or_else(|| BlobError::not_found(key))?;
        blob.extend_from_slice(&bytes);
        Ok(blob.len() as u64)
    }

    async fn len(&self, key: &str) -> BlobResult<u64> {
        let blobs = self.blobs.read();
        let blob = blobs.get(key).ok_or_else(|| BlobError::not_found(key))?;
        Ok(blob.len() as u64)
    }

    async fn read(&self, key: &str) -> BlobResult<Bytes> {
        let blobs = self.blobs.read();
        let blob = blobs.get(key).ok_or_else(|| BlobError::not_found(key))?;
        Ok(Bytes::copy_from_slice(blob))
    }

    async fn remove(&self, key: &str) -> BlobResult<()> {
        self.blobs.write().remove(key);
        Ok(())
    }
}

/// Filesystem-backed staging under a root directory.
pub struct FsStagingStore {
    root: PathBuf,
}

impl FsStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys come from KeyStrategy over sanitized names; segments are
        // joined, never interpreted.
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    async fn ensure_parent(path: &Path) -> BlobResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StagingStore for FsStagingStore {
    async fn create(&self, key: &str) -> BlobResult<()> {
        let path = self.path_for(key);
        Self::ensure_parent(&path).await?;
        tokio::fs::write(&path, b"").await?;
        Ok(())
    }

    async fn append(&self, key: &str, bytes: Bytes) -> BlobResult<u64> {
        let path = self.path_for(key);
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BlobError::not_found(key),
                _ => BlobError::from(e),
            })?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        let meta = file.metadata().await?;
        Ok(meta.len())
    }

    async fn len(&self, key: &str) -> BlobResult<u64> {
        let path = self.path_for(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, key: &str) -> BlobResult<Bytes> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> BlobResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_append_accumulates() {
        let store = MemoryStagingStore::new();
        store.create("a/photo.png").await.unwrap();

        assert_eq!(
            store
                .append("a/photo.png", Bytes::from_static(b"hello "))
                .await
                .unwrap(),
            6
        );
        assert_eq!(
            store
                .append("a/photo.png", Bytes::from_static(b"world"))
                .await
                .unwrap(),
            11
        );
        assert_eq!(store.len("a/photo.png").await.unwrap(), 11);
        assert_eq!(store.read("a/photo.png").await.unwrap().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn memory_keys_are_isolated() {
        let store = MemoryStagingStore::new();
        store.create("a/one").await.unwrap();
        store.create("b/one").await.unwrap();

        store.append("a/one", Bytes::from_static(b"aaaa")).await.unwrap();
        store.append("b/one", Bytes::from_static(b"bb")).await.unwrap();

        assert_eq!(store.len("a/one").await.unwrap(), 4);
        assert_eq!(store.len("b/one").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn append_to_missing_blob_is_not_found() {
        let store = MemoryStagingStore::new();
        let err = store
            .append("nope", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryStagingStore::new();
        store.create("gone").await.unwrap();
        store.remove("gone").await.unwrap();
        store.remove("gone").await.unwrap();
        assert!(store.len("gone").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn fs_store_roundtrip() {
        let root = std::env::temp_dir().join(format!("pouch-staging-{}", std::process::id()));
        let store = FsStagingStore::new(&root);

        store.create("uploads/tok/photo.png").await.unwrap();
        let total = store
            .append("uploads/tok/photo.png", Bytes::from_static(b"bytes"))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(
            store.read("uploads/tok/photo.png").await.unwrap().as_ref(),
            b"bytes"
        );

        store.remove("uploads/tok/photo.png").await.unwrap();
        assert!(store
            .len("uploads/tok/photo.png")
            .await
            .unwrap_err()
            .is_not_found());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
