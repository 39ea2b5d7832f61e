use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{BlobError, BlobResult};
use crate::types::{SessionKey, SessionState, UploadSession};

/// Storage for upload session records.
///
/// Sessions stay in the store after reaching a terminal state so a late
/// finalize or delete can answer deterministically; the sweeper is the
/// only thing that forgets them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session record. Fails on key collision.
    async fn create(&self, session: UploadSession) -> BlobResult<()>;

    /// Get a session record.
    async fn get(&self, key: &SessionKey) -> BlobResult<UploadSession>;

    /// Replace a session record.
    async fn update(&self, session: UploadSession) -> BlobResult<()>;

    /// Open sessions idle since before the cutoff.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> BlobResult<Vec<UploadSession>>;

    /// Drop terminal records older than the cutoff.
    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> BlobResult<usize>;
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: UploadSession) -> BlobResult<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.key) {
            return Err(BlobError::invalid(format!(
                "Session already exists: {}",
                session.key
            )));
        }
        sessions.insert(session.key.clone(), session);
        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> BlobResult<UploadSession> {
        self.sessions
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::not_found(key.to_string()))
    }

    async fn update(&self, session: UploadSession) -> BlobResult<()> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&session.key) {
            Some(existing) => {
                *existing = session;
                Ok(())
            }
            None => Err(BlobError::not_found(session.key.to_string())),
        }
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> BlobResult<Vec<UploadSession>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.state == SessionState::Open && s.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> BlobResult<usize> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !(s.state.is_terminal() && s.updated_at < cutoff));
        Ok(before - sessions.len())
    }
}
