pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;

use crate::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, LeaseToken, LeasedJob, QueueResult};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Storage primitives for the durable job queue. The adapter layers
/// payload encoding, dispatch, and backoff policy on top; backends only
/// persist records, hand out leases, and honor acknowledgments.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Enqueue a job. If the message carries an idempotency key and a
    /// non-terminal job with the same (queue, job_type, key) scope
    /// exists, that job's id is returned instead of creating a new one.
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId>;

    /// Lease the next eligible job from the given queues, FIFO within
    /// each queue. Returns `None` when nothing is eligible.
    async fn dequeue(&self, queues: &[&str]) -> QueueResult<Option<LeasedJob>>;

    /// Acknowledge successful completion. The lease token must match
    /// and the lease must still be live.
    async fn ack_complete(&self, job_id: JobId, lease_token: LeaseToken) -> QueueResult<()>;

    /// Acknowledge failure. `retry_at: Some(_)` schedules a retry at
    /// that time; `None` fails the job permanently. Backoff policy is
    /// computed by the caller, not the backend.
    async fn ack_fail(
        &self,
        job_id: JobId,
        lease_token: LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<()>;

    /// Current status of a job
    async fn get_status(&self, job_id: JobId) -> QueueResult<JobStatus>;

    /// Full job record, including attempt count and last error
    async fn get_record(&self, job_id: JobId) -> QueueResult<JobRecord>;

    /// Event stream for observability
    fn event_stream(&self) -> BoxStream<JobEvent>;
}
