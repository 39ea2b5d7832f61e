use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BlobConfig;
use crate::error::{BlobError, BlobResult};
use crate::keys::{sanitize_file_name, KeyStrategy};
use crate::sessions::SessionStore;
use crate::staging::StagingStore;
use crate::store::ObjectStore;
use crate::types::{
    AssetType, CompletionEvent, PrincipalId, SessionKey, SessionState, UploadSession, UploadToken,
};

/// Where finalized uploads announce themselves. In production this is
/// the durable job queue; tests substitute a recorder.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn publish(&self, event: CompletionEvent) -> BlobResult<()>;
}

/// The upload protocol state machine.
///
/// `OPEN --append*--> OPEN --finalize--> COMPLETE`,
/// `OPEN --delete--> DELETED`; `COMPLETE` and `DELETED` are terminal.
///
/// Appends to one session are serialized by a per-session exclusive
/// lock, so the tracked byte offset and the staged bytes move together.
/// Finalize orders the durable object write strictly before the
/// completion-event publish; a publish failure parks the event in the
/// outbox instead of losing it.
pub struct UploadGateway {
    sessions: Arc<dyn SessionStore>,
    staging: Arc<dyn StagingStore>,
    objects: Arc<dyn ObjectStore>,
    keys: Arc<dyn KeyStrategy>,
    sink: Arc<dyn CompletionSink>,
    config: BlobConfig,
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
    outbox: Mutex<VecDeque<CompletionEvent>>,
}

impl UploadGateway {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        staging: Arc<dyn StagingStore>,
        objects: Arc<dyn ObjectStore>,
        keys: Arc<dyn KeyStrategy>,
        sink: Arc<dyn CompletionSink>,
        config: BlobConfig,
    ) -> Self {
        Self {
            sessions,
            staging,
            objects,
            keys,
            sink,
            config,
            locks: Mutex::new(HashMap::new()),
            outbox: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    fn session_key(&self, token: &UploadToken, raw_name: &str) -> BlobResult<SessionKey> {
        let file_name = sanitize_file_name(raw_name);
        if file_name.is_empty() {
            return Err(BlobError::invalid("file_name must not be empty"));
        }
        Ok(SessionKey::new(file_name, token.clone()))
    }

    fn session_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn drop_session_lock(&self, key: &SessionKey) {
        self.locks.lock().remove(key);
    }

    /// Open a new upload session and allocate its token.
    pub async fn handshake(
        &self,
        owner: &PrincipalId,
        raw_name: &str,
    ) -> BlobResult<UploadToken> {
        let token = UploadToken::generate();
        let key = self.session_key(&token, raw_name)?;

        self.staging.create(&self.keys.staging_key(&key)).await?;
        self.sessions
            .create(UploadSession::open(key.clone(), owner.clone()))
            .await?;

        info!(session = %key, owner = %owner, "opened upload session");
        Ok(token)
    }

    /// Append a chunk to an open session, returning the new total.
    pub async fn append(
        &self,
        token: &UploadToken,
        raw_name: &str,
        bytes: Bytes,
    ) -> BlobResult<u64> {
        let key = self.session_key(token, raw_name)?;
        let lock = self.session_lock(&key);
        let _guard = lock.lock().await;

        let mut session = self.sessions.get(&key).await?;
        match session.state {
            SessionState::Open => {}
            SessionState::Deleted => return Err(BlobError::not_found(key.to_string())),
            SessionState::Complete => {
                return Err(BlobError::closed(session.state.name()));
            }
        }

        let projected = session.bytes_received + bytes.len() as u64;
        if projected > self.config.max_upload_bytes {
            return Err(BlobError::TooLarge {
                size: projected,
                max: self.config.max_upload_bytes,
            });
        }

        let total = self
            .staging
            .append(&self.keys.staging_key(&key), bytes)
            .await?;
        session.record_append(total);
        self.sessions.update(session).await?;

        debug!(session = %key, total, "appended chunk");
        Ok(total)
    }

    /// Bytes persisted so far for an existing session.
    pub async fn status(&self, token: &UploadToken, raw_name: &str) -> BlobResult<u64> {
        let key = self.session_key(token, raw_name)?;
        let session = self.sessions.get(&key).await?;
        if session.state == SessionState::Deleted {
            return Err(BlobError::not_found(key.to_string()));
        }
        Ok(session.bytes_received)
    }

    /// Delete a session and reclaim its staged bytes. Idempotent:
    /// unknown or already-deleted sessions succeed, so client retries
    /// are harmless.
    pub async fn remove(&self, token: &UploadToken, raw_name: &str) -> BlobResult<()> {
        let key = self.session_key(token, raw_name)?;
        let lock = self.session_lock(&key);
        let _guard = lock.lock().await;

        let mut session = match self.sessions.get(&key).await {
            Ok(session) => session,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if session.state == SessionState::Open {
            self.staging.remove(&self.keys.staging_key(&key)).await?;
            session.mark_deleted();
            self.sessions.update(session).await?;
            info!(session = %key, "deleted upload session");
        }

        drop(_guard);
        self.drop_session_lock(&key);
        Ok(())
    }

    /// Move staged bytes into durable storage and announce completion.
    ///
    /// The durable write happens-before the event publish, so a consumer
    /// never sees an event for an object that does not exist. Repeat
    /// finalize of a completed session returns the recorded path without
    /// a second write or a second event.
    pub async fn finalize(
        &self,
        token: &UploadToken,
        raw_name: &str,
        asset_type: AssetType,
    ) -> BlobResult<String> {
        let key = self.session_key(token, raw_name)?;
        let lock = self.session_lock(&key);
        let _guard = lock.lock().await;

        let mut session = self.sessions.get(&key).await?;
        match session.state {
            SessionState::Open => {}
            SessionState::Deleted => return Err(BlobError::not_found(key.to_string())),
            SessionState::Complete => {
                // Redelivered finalize: answer from the record.
                return session
                    .durable_path
                    .clone()
                    .ok_or_else(|| BlobError::invalid("completed session lost its path"));
            }
        }

        let staging_key = self.keys.staging_key(&key);
        let object_key = self.keys.object_key(&key);
        let bytes = self.staging.read(&staging_key).await?;

        self.objects
            .put(asset_type.bucket(), &object_key, bytes)
            .await?;

        session.mark_complete(object_key.clone());
        let owner = session.owner.clone();
        self.sessions.update(session).await?;

        // Staged copy is reclaimed best-effort; the durable object is
        // already the source of truth.
        if let Err(e) = self.staging.remove(&staging_key).await {
            warn!(session = %key, error = %e, "failed to reclaim staged blob");
        }

        let event = CompletionEvent {
            user_id: owner.0,
            asset_type,
            path: object_key.clone(),
        };

        if let Err(e) = self.sink.publish(event.clone()).await {
            warn!(session = %key, error = %e, "completion publish failed, parking in outbox");
            self.outbox.lock().push_back(event);
        }

        info!(session = %key, path = %object_key, "finalized upload");
        drop(_guard);
        self.drop_session_lock(&key);
        Ok(object_key)
    }

    /// Re-drive parked completion events in order. Stops at the first
    /// event the sink still refuses, preserving FIFO.
    pub async fn flush_outbox(&self) -> usize {
        let mut published = 0;
        loop {
            let event = match self.outbox.lock().pop_front() {
                Some(event) => event,
                None => break,
            };
            if let Err(e) = self.sink.publish(event.clone()).await {
                warn!(error = %e, "outbox publish still failing");
                self.outbox.lock().push_front(event);
                break;
            }
            published += 1;
        }
        published
    }

    /// Parked completion events (test observability).
    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Delete Open sessions idle longer than the configured TTL and
    /// forget terminal records of the same age. Returns how many live
    /// sessions were reclaimed.
    pub async fn sweep_expired(&self) -> BlobResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.session_ttl).unwrap_or_default();

        let stale = self.sessions.list_stale(cutoff).await?;
        let mut reclaimed = 0;
        for session in stale {
            let lock = self.session_lock(&session.key);
            let _guard = lock.lock().await;

            // Re-check under the lock; an append or finalize may have
            // won the race.
            let mut current = match self.sessions.get(&session.key).await {
                Ok(s) if s.state == SessionState::Open && s.updated_at < cutoff => s,
                _ => continue,
            };

            self.staging
                .remove(&self.keys.staging_key(&current.key))
                .await?;
            current.mark_deleted();
            self.sessions.update(current).await?;

            drop(_guard);
            self.drop_session_lock(&session.key);
            reclaimed += 1;
        }

        let pruned = self.sessions.prune_terminal(cutoff).await?;
        if reclaimed > 0 || pruned > 0 {
            info!(reclaimed, pruned, "swept upload sessions");
        }
        Ok(reclaimed)
    }
}
