use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::backend::{BoxStream, QueueBackend};
use crate::{
    JobEvent, JobId, JobMessage, JobRecord, JobStatus, LeaseToken, LeasedJob, QueueError,
    QueueResult,
};

/// Idempotency scope: (queue, job_type, key)
type IdempotencyMap = HashMap<(String, String, String), JobId>;

/// In-memory backend for development and tests. Jobs survive for the
/// process lifetime; terminal records are kept so failures stay
/// inspectable.
pub struct MemoryBackend {
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,

    /// queue_name -> job ids in FIFO order
    pub(crate) queues: Arc<RwLock<HashMap<String, VecDeque<JobId>>>>,

    idempotency: Arc<RwLock<IdempotencyMap>>,

    event_broadcaster: broadcast::Sender<JobEvent>,

    lease_duration: chrono::Duration,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            idempotency: Arc::new(RwLock::new(HashMap::new())),
            event_broadcaster,
            lease_duration: chrono::Duration::seconds(300),
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: std::time::Duration) -> Self {
        self.lease_duration =
            chrono::Duration::from_std(lease_duration).unwrap_or(self.lease_duration);
        self
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    pub(crate) fn requeue(&self, queue: &str, job_id: JobId) {
        self.queues
            .write()
            .entry(queue.to_string())
            .or_default()
            .push_back(job_id);
    }

    /// Make a retrying job immediately eligible (test hook).
    pub fn force_retry_now(&self, job_id: &JobId) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            if let JobStatus::Retrying { ref mut retry_at } = record.status {
                *retry_at = Utc::now();
            }
        }
    }

    /// Force a live lease to expire (test hook for the reaper path).
    pub fn force_lease_expiry(&self, job_id: &JobId) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            let past = Utc::now() - chrono::Duration::seconds(1);
            if let JobStatus::Processing { ref mut lease_until } = record.status {
                *lease_until = past;
            }
            if let Some(ref mut lease_until) = record.lease_until {
                *lease_until = past;
            }
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        if let Some(ref key) = message.idempotency_key {
            let scope = (
                message.queue.clone(),
                message.job_type.clone(),
                key.clone(),
            );
            let idempotency = self.idempotency.read();
            if let Some(existing_id) = idempotency.get(&scope) {
                let jobs = self.jobs.read();
                if let Some(existing) = jobs.get(existing_id) {
                    if !existing.status.is_terminal() {
                        return Ok(existing_id.clone());
                    }
                }
            }
        }

        let job_id = JobId::new();
        let now = Utc::now();
        let record = JobRecord::new(job_id.clone(), message.clone());

        self.jobs.write().insert(job_id.clone(), record);
        self.requeue(&message.queue, job_id.clone());

        if let Some(ref key) = message.idempotency_key {
            let scope = (
                message.queue.clone(),
                message.job_type.clone(),
                key.clone(),
            );
            self.idempotency.write().insert(scope, job_id.clone());
        }

        self.emit(JobEvent::Enqueued {
            job_id: job_id.clone(),
            queue: message.queue.clone(),
            job_type: message.job_type.clone(),
            at: now,
        });

        Ok(job_id)
    }

    async fn dequeue(&self, queues: &[&str]) -> QueueResult<Option<LeasedJob>> {
        let now = Utc::now();

        for queue_name in queues {
            let mut queues_lock = self.queues.write();
            let Some(queue) = queues_lock.get_mut(*queue_name) else {
                continue;
            };

            // First waiting entry whose delay has elapsed; entries in a
            // non-waiting status are dropped from the index as we pass.
            let mut jobs = self.jobs.write();
            let mut chosen = None;
            let mut index = 0;
            while index < queue.len() {
                let job_id = &queue[index];
                match jobs.get(job_id) {
                    Some(record) if record.is_eligible(now) => {
                        chosen = Some(index);
                        break;
                    }
                    Some(record)
                        if matches!(
                            record.status,
                            JobStatus::Enqueued | JobStatus::Retrying { .. }
                        ) =>
                    {
                        // Still delayed, keep its slot
                        index += 1;
                    }
                    _ => {
                        queue.remove(index);
                    }
                }
            }

            if let Some(index) = chosen {
                let job_id = queue.remove(index).expect("index in bounds");
                let record = jobs.get_mut(&job_id).expect("record exists for queued id");

                let lease_token = LeaseToken::new();
                let lease_until = now + self.lease_duration;
                record.start_processing(lease_token.clone(), lease_until);
                let leased = LeasedJob {
                    record: record.clone(),
                    lease_token,
                    lease_until,
                };
                drop(jobs);
                drop(queues_lock);

                self.emit(JobEvent::Leased {
                    job_id,
                    lease_until,
                    at: now,
                });
                return Ok(Some(leased));
            }
        }

        Ok(None)
    }

    async fn ack_complete(&self, job_id: JobId, lease_token: LeaseToken) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if record.lease_token.as_ref() != Some(&lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }
        if let Some(lease_until) = record.lease_until {
            if now > lease_until {
                return Err(QueueError::LeaseExpired);
            }
        }

        record.complete();
        drop(jobs);

        self.emit(JobEvent::Completed { job_id, at: now });
        Ok(())
    }

    async fn ack_fail(
        &self,
        job_id: JobId,
        lease_token: LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if record.lease_token.as_ref() != Some(&lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }
        if let Some(lease_until) = record.lease_until {
            if now > lease_until {
                return Err(QueueError::LeaseExpired);
            }
        }

        // Attempt budget is enforced here as well, so a caller cannot
        // schedule retries past the policy.
        if retry_at.is_some() && !record.message.retry.allows_retry(record.attempt) {
            let error = format!("Attempts exhausted: {}", error);
            record.fail(error.clone());
            drop(jobs);
            self.emit(JobEvent::Failed { job_id, error, at: now });
            return Ok(());
        }

        match retry_at {
            Some(retry_time) => {
                record.schedule_retry(retry_time, error.clone());
                let queue = record.message.queue.clone();
                drop(jobs);

                self.requeue(&queue, job_id.clone());
                self.emit(JobEvent::Retrying {
                    job_id,
                    retry_at: retry_time,
                    error,
                    at: now,
                });
            }
            None => {
                record.fail(error.clone());
                drop(jobs);
                self.emit(JobEvent::Failed { job_id, error, at: now });
            }
        }

        Ok(())
    }

    async fn get_status(&self, job_id: JobId) -> QueueResult<JobStatus> {
        let jobs = self.jobs.read();
        let record = jobs
            .get(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        Ok(record.status.clone())
    }

    async fn get_record(&self, job_id: JobId) -> QueueResult<JobRecord> {
        let jobs = self.jobs.read();
        let record = jobs
            .get(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        Ok(record.clone())
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
