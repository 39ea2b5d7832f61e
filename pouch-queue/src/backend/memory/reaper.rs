use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::MemoryBackend;
use crate::{JobEvent, QueueResult};

/// Reclaims jobs whose worker lease expired without an acknowledgment.
/// Reclaimed jobs become immediately retryable, or fail permanently
/// when their attempt budget is spent.
pub struct LeaseReaper {
    backend: Arc<MemoryBackend>,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(backend: Arc<MemoryBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Run the reaper loop until the task is dropped.
    pub async fn start(self) -> QueueResult<()> {
        let mut ticker = interval(self.interval);
        info!(interval = ?self.interval, "starting lease reaper");

        loop {
            ticker.tick().await;
            match self.reap_expired_leases().await {
                Ok(0) => debug!("no expired leases"),
                Ok(count) => info!(count, "reclaimed expired leases"),
                Err(e) => warn!(error = %e, "lease reaping failed"),
            }
        }
    }

    /// One reaper cycle (exposed for tests).
    pub async fn reap_expired_leases(&self) -> QueueResult<usize> {
        let now = Utc::now();

        let expired: Vec<_> = {
            let jobs = self.backend.jobs.read();
            jobs.iter()
                .filter(|(_, record)| record.lease_expired(now))
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        let mut reclaimed = 0;
        for job_id in expired {
            let outcome = {
                let mut jobs = self.backend.jobs.write();
                let Some(record) = jobs.get_mut(&job_id) else {
                    continue;
                };
                if !record.lease_expired(now) {
                    continue;
                }

                if record.message.retry.allows_retry(record.attempt) {
                    record.schedule_retry(now, "Lease expired".to_string());
                    Some((record.message.queue.clone(), true))
                } else {
                    record.fail("Attempts exhausted: lease expired".to_string());
                    Some((record.message.queue.clone(), false))
                }
            };

            match outcome {
                Some((queue, true)) => {
                    self.backend.requeue(&queue, job_id.clone());
                    self.backend.emit(JobEvent::Retrying {
                        job_id: job_id.clone(),
                        retry_at: now,
                        error: "Lease expired".to_string(),
                        at: now,
                    });
                    reclaimed += 1;
                }
                Some((_, false)) => {
                    self.backend.emit(JobEvent::Failed {
                        job_id: job_id.clone(),
                        error: "Attempts exhausted: lease expired".to_string(),
                        at: now,
                    });
                    reclaimed += 1;
                }
                None => {}
            }
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QueueBackend;
    use crate::{JobMessage, JobStatus, RetryPolicy};

    fn message(retry: RetryPolicy) -> JobMessage {
        JobMessage::new(
            "test_job".to_string(),
            b"payload".to_vec(),
            "json".to_string(),
            "default".to_string(),
        )
        .with_retry(retry)
    }

    #[tokio::test]
    async fn expired_lease_returns_job_to_the_queue() {
        let backend = Arc::new(MemoryBackend::new());
        let job_id = backend.enqueue(message(RetryPolicy::default())).await.unwrap();
        backend.dequeue(&["default"]).await.unwrap().unwrap();

        backend.force_lease_expiry(&job_id);
        let reaper = LeaseReaper::new(backend.clone());
        assert_eq!(reaper.reap_expired_leases().await.unwrap(), 1);

        let leased = backend.dequeue(&["default"]).await.unwrap().unwrap();
        assert_eq!(*leased.job_id(), job_id);
        assert_eq!(leased.record.attempt, 2);
    }

    #[tokio::test]
    async fn exhausted_job_fails_instead_of_requeueing() {
        let backend = Arc::new(MemoryBackend::new());
        let job_id = backend.enqueue(message(RetryPolicy::new(1, 0))).await.unwrap();
        backend.dequeue(&["default"]).await.unwrap().unwrap();

        backend.force_lease_expiry(&job_id);
        let reaper = LeaseReaper::new(backend.clone());
        reaper.reap_expired_leases().await.unwrap();

        let status = backend.get_status(job_id).await.unwrap();
        assert!(matches!(status, JobStatus::Failed { .. }));
    }
}
