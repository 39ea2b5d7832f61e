use std::time::Duration;

/// Configuration for staging and gateway behavior
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Absolute max size allowed for one staged upload (safety guard)
    pub max_upload_bytes: u64,

    /// How long an Open session may sit idle before the sweeper
    /// reclaims it
    pub session_ttl: Duration,

    /// Lifetime of presigned read URLs handed to the cache layer
    pub url_ttl: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024, // 50MB
            session_ttl: Duration::from_secs(24 * 60 * 60),
            url_ttl: Duration::from_secs(300),
        }
    }
}

impl BlobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }
}
