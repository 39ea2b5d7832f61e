use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use pouch_core::errors::PouchResult;

/// TTL cache of ready-to-serve asset URLs keyed by user. The cache is
/// a read-side accelerator only; every write here is best effort and
/// the system of record never depends on it.
#[async_trait]
pub trait OnboardCache: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> PouchResult<()>;

    /// `None` when the key is missing or its TTL has lapsed.
    async fn get(&self, key: &str) -> PouchResult<Option<String>>;

    async fn expire(&self, key: &str) -> PouchResult<()>;
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory TTL cache for development and tests.
pub struct MemoryOnboardCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryOnboardCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryOnboardCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OnboardCache for MemoryOnboardCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> PouchResult<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> PouchResult<Option<String>> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn expire(&self, key: &str) -> PouchResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_lapse_after_ttl() {
        let cache = MemoryOnboardCache::new();
        cache
            .set("u-1:avatar", "https://signed".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(cache.get("u-1:avatar").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("u-1:avatar").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expire_removes_immediately() {
        let cache = MemoryOnboardCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.expire("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
