use std::sync::Arc;
use std::time::Duration;

use pouch_blob::{
    BlobConfig, DefaultKeyStrategy, MemoryObjectStore, MemorySessionStore, MemoryStagingStore,
    ObjectStore, UploadGateway,
};
use pouch_queue::{MemoryBackend, QueueAdapter};

use crate::cache::{MemoryOnboardCache, OnboardCache};
use crate::jobs::{LoggingMailer, WorkerContext};
use crate::sink::QueueCompletionSink;
use crate::users::{MemoryUserRepository, UserRepository};

/// Everything the HTTP handlers need, wired explicitly.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<UploadGateway>,
    pub queue: QueueAdapter<MemoryBackend>,
    pub users: Arc<dyn UserRepository>,
    pub cache: Arc<dyn OnboardCache>,
    pub objects: Arc<dyn ObjectStore>,
}

impl AppState {
    /// Wire the full pipeline over in-memory backends.
    pub fn in_memory(config: BlobConfig) -> Self {
        let users: Arc<MemoryUserRepository> = Arc::new(MemoryUserRepository::new());
        Self::in_memory_with_users(config, users)
    }

    /// Same wiring, but with a caller-provided user repository so tests
    /// can seed profiles.
    pub fn in_memory_with_users(config: BlobConfig, users: Arc<MemoryUserRepository>) -> Self {
        let objects: Arc<MemoryObjectStore> = Arc::new(MemoryObjectStore::new());
        let cache: Arc<MemoryOnboardCache> = Arc::new(MemoryOnboardCache::new());
        let queue = QueueAdapter::new(MemoryBackend::new());

        let gateway = Arc::new(UploadGateway::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryStagingStore::new()),
            objects.clone(),
            Arc::new(DefaultKeyStrategy),
            Arc::new(QueueCompletionSink::new(queue.clone())),
            config.clone(),
        ));

        Self {
            gateway,
            queue,
            users,
            cache,
            objects,
        }
    }

    /// Context handed to the background workers.
    pub fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            users: self.users.clone(),
            cache: self.cache.clone(),
            objects: self.objects.clone(),
            mailer: Arc::new(LoggingMailer),
            url_ttl: self.gateway.config().url_ttl,
        }
    }

    pub fn url_ttl(&self) -> Duration {
        self.gateway.config().url_ttl
    }
}
