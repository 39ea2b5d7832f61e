//! Behavioral conformance checks for the memory backend, driven
//! through the public adapter and backend APIs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_stream::StreamExt;

use pouch_queue::{
    Job, JobError, JobMessage, JobStatus, MemoryBackend, QueueAdapter, QueueBackend, RetryPolicy,
};

fn message(queue: &str) -> JobMessage {
    JobMessage::new(
        "noop".to_string(),
        b"{}".to_vec(),
        "json".to_string(),
        queue.to_string(),
    )
}

#[tokio::test]
async fn retry_schedule_follows_exponential_backoff() {
    let backend = MemoryBackend::new();
    let job_id = backend
        .enqueue(message("default").with_retry(RetryPolicy::new(4, 1_000)))
        .await
        .unwrap();

    // Fail attempts one and two by hand, checking the scheduled delay
    // doubles: ~1000ms after the first failure, ~2000ms after the second.
    for expected_ms in [1_000i64, 2_000] {
        // Make the job immediately eligible again for the test.
        {
            let record = backend.get_record(job_id.clone()).await.unwrap();
            if let JobStatus::Retrying { .. } = record.status {
                backend.force_retry_now(&job_id);
            }
        }

        let leased = backend.dequeue(&["default"]).await.unwrap().unwrap();
        let policy = leased.record.message.retry;
        let before = Utc::now();
        let retry_at = policy.retry_at(leased.record.attempt, before);
        backend
            .ack_fail(
                job_id.clone(),
                leased.lease_token,
                "transient".to_string(),
                Some(retry_at),
            )
            .await
            .unwrap();

        let delay = (retry_at - before).num_milliseconds();
        assert_eq!(delay, expected_ms);
    }
}

#[tokio::test]
async fn failed_jobs_remain_inspectable() {
    let backend = MemoryBackend::new();
    let job_id = backend
        .enqueue(message("default").with_retry(RetryPolicy::none()))
        .await
        .unwrap();

    let leased = backend.dequeue(&["default"]).await.unwrap().unwrap();
    backend
        .ack_fail(job_id.clone(), leased.lease_token, "boom".to_string(), None)
        .await
        .unwrap();

    let record = backend.get_record(job_id).await.unwrap();
    assert!(matches!(record.status, JobStatus::Failed { .. }));
    assert_eq!(record.attempt, 1);
    assert_eq!(record.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn queues_are_independent() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("emails")).await.unwrap();
    backend.enqueue(message("assets")).await.unwrap();

    assert!(backend.dequeue(&["other"]).await.unwrap().is_none());
    assert!(backend.dequeue(&["emails"]).await.unwrap().is_some());
    assert!(backend.dequeue(&["emails"]).await.unwrap().is_none());
    assert!(backend.dequeue(&["assets"]).await.unwrap().is_some());
}

#[tokio::test]
async fn event_stream_reports_lifecycle() {
    let backend = MemoryBackend::new();
    let mut events = backend.event_stream();

    let job_id = backend.enqueue(message("default")).await.unwrap();
    let leased = backend.dequeue(&["default"]).await.unwrap().unwrap();
    backend
        .ack_complete(job_id.clone(), leased.lease_token)
        .await
        .unwrap();

    let mut names = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("event within deadline")
            .expect("stream open");
        assert_eq!(*event.job_id(), job_id);
        names.push(event.event_name());
    }
    assert_eq!(names, ["enqueued", "leased", "completed"]);
}

#[derive(serde::Serialize, serde::Deserialize)]
struct NoopJob {
    key: String,
}

#[async_trait]
impl Job for NoopJob {
    type Context = ();
    type Result = ();

    const JOB_TYPE: &'static str = "noop";

    fn idempotency_key(&self) -> Option<String> {
        Some(self.key.clone())
    }

    async fn execute(&self, _ctx: Self::Context) -> Result<(), JobError> {
        Ok(())
    }
}

#[tokio::test]
async fn adapter_enqueue_is_idempotent_per_key() {
    let adapter = QueueAdapter::new(MemoryBackend::new());
    adapter.register_job::<NoopJob>().await.unwrap();

    let first = adapter
        .enqueue(
            "default",
            NoopJob {
                key: "k1".to_string(),
            },
        )
        .await
        .unwrap();
    let second = adapter
        .enqueue(
            "default",
            NoopJob {
                key: "k1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(first, second);
}
