use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::QueueBackend;
use crate::job::JobRegistry;
use crate::{Job, JobId, JobMessage, QueueError, QueueResult};

/// Tuning for the worker loop
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a single poll sleeps when no job is eligible
    pub poll_interval: Duration,

    /// Pause after an infrastructure error before polling again
    pub error_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Handle for a running worker; `shutdown` lets the job in flight run
/// to completion and ack before the loop exits.
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<()>>,
}

impl WorkerHandle {
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?
    }
}

/// Typed facade over a [`QueueBackend`]: serializes jobs on enqueue,
/// dispatches leased jobs through the registry, and turns job errors
/// into retry schedules from each job type's policy.
pub struct QueueAdapter<B: QueueBackend + ?Sized> {
    backend: Arc<B>,
    job_registry: Arc<RwLock<JobRegistry>>,
    config: QueueConfig,
}

impl<B: QueueBackend + Send + Sync + 'static> QueueAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            job_registry: Arc::new(RwLock::new(JobRegistry::new())),
            config: QueueConfig::default(),
        }
    }

    pub fn with_config(backend: B, config: QueueConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            job_registry: Arc::new(RwLock::new(JobRegistry::new())),
            config,
        }
    }

    /// Register a job type for worker dispatch.
    pub async fn register_job<J: Job>(&self) -> QueueResult<()> {
        let mut registry = self.job_registry.write().await;
        registry.register::<J>()?;
        info!(job_type = J::JOB_TYPE, "registered job type");
        Ok(())
    }

    /// Serialize and enqueue a job onto the named queue.
    #[instrument(skip(self, job), fields(job_type = J::JOB_TYPE, queue = queue))]
    pub async fn enqueue<J: Job>(&self, queue: &str, job: J) -> QueueResult<JobId> {
        let payload = serde_json::to_vec(&job)?;
        let mut message = JobMessage::new(
            J::JOB_TYPE.to_string(),
            payload,
            "json".to_string(),
            queue.to_string(),
        )
        .with_retry(J::retry_policy());

        if let Some(key) = job.idempotency_key() {
            message = message.with_idempotency_key(key);
        }

        let job_id = self.backend.enqueue(message).await?;
        debug!(%job_id, "enqueued job");
        Ok(job_id)
    }

    /// Spawn a worker that leases jobs from `queues` and executes them
    /// against `context` until shut down.
    pub fn start_workers<C>(&self, context: C, queues: Vec<String>) -> WorkerHandle
    where
        C: Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            backend: self.backend.clone() as Arc<dyn QueueBackend + Send + Sync>,
            job_registry: self.job_registry.clone(),
            config: self.config.clone(),
            context: Arc::new(context),
            queues,
            shutdown_rx: Some(shutdown_rx),
        };

        let join_handle = tokio::spawn(async move { worker.run().await });

        WorkerHandle {
            shutdown_tx,
            join_handle,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_arc(&self) -> Arc<B> {
        self.backend.clone()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl<B: QueueBackend> Clone for QueueAdapter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            job_registry: self.job_registry.clone(),
            config: self.config.clone(),
        }
    }
}

struct Worker<C> {
    backend: Arc<dyn QueueBackend + Send + Sync>,
    job_registry: Arc<RwLock<JobRegistry>>,
    config: QueueConfig,
    context: Arc<C>,
    queues: Vec<String>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl<C: Send + Sync + 'static> Worker<C> {
    async fn run(mut self) -> QueueResult<()> {
        let mut shutdown_rx = self.shutdown_rx.take().expect("worker runs once");
        info!(queues = ?self.queues, "worker started");

        // Shutdown is only observed between jobs: a leased job always runs
        // to completion and acks, it is never abandoned to the reaper.
        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Closed) => {
                    info!("worker shutdown requested");
                    break;
                }
            }

            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            info!("worker shutdown requested");
                            break;
                        }
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "error processing job");
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            info!("worker shutdown requested");
                            break;
                        }
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!("worker stopped");
        Ok(())
    }

    async fn process_next_job(&self) -> QueueResult<bool> {
        let queue_refs: Vec<&str> = self.queues.iter().map(|s| s.as_str()).collect();
        let leased = match self.backend.dequeue(&queue_refs).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        let job_id = leased.record.job_id.clone();
        let job_type = leased.record.message.job_type.clone();
        debug!(%job_id, %job_type, attempt = leased.record.attempt, "processing job");

        let registry = self.job_registry.read().await;
        let result = registry
            .execute_job(
                &leased.record.message,
                self.context.clone() as Arc<dyn std::any::Any + Send + Sync>,
            )
            .await;
        drop(registry);

        match result {
            Ok(()) => {
                self.backend
                    .ack_complete(job_id.clone(), leased.lease_token)
                    .await?;
                debug!(%job_id, "job completed");
            }
            Err(job_error) => {
                let policy = leased.record.message.retry;
                let retry_at = if job_error.is_retryable() && policy.allows_retry(leased.record.attempt)
                {
                    Some(policy.retry_at(leased.record.attempt, Utc::now()))
                } else {
                    None
                };

                self.backend
                    .ack_fail(
                        job_id.clone(),
                        leased.lease_token,
                        job_error.to_string(),
                        retry_at,
                    )
                    .await?;

                if retry_at.is_some() {
                    warn!(%job_id, error = %job_error, "job failed, retry scheduled");
                } else {
                    error!(%job_id, error = %job_error, "job failed permanently");
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::{JobError, JobStatus, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone)]
    struct Counters {
        executions: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct FlakyJob;

    #[async_trait]
    impl Job for FlakyJob {
        type Context = Counters;
        type Result = ();

        const JOB_TYPE: &'static str = "flaky";

        fn retry_policy() -> RetryPolicy {
            RetryPolicy::new(3, 0)
        }

        async fn execute(&self, ctx: Self::Context) -> Result<(), JobError> {
            let n = ctx.executions.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= ctx.fail_first {
                Err(JobError::retryable(format!("transient failure {}", n)))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Clone)]
    struct SlowCtx {
        finished: Arc<AtomicU32>,
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct SlowJob;

    #[async_trait]
    impl Job for SlowJob {
        type Context = SlowCtx;
        type Result = ();

        const JOB_TYPE: &'static str = "slow";

        async fn execute(&self, ctx: Self::Context) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ctx.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_for_terminal(
        backend: &MemoryBackend,
        job_id: &JobId,
    ) -> JobStatus {
        for _ in 0..200 {
            let status = backend.get_status(job_id.clone()).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn worker_retries_until_success() {
        let adapter = QueueAdapter::new(MemoryBackend::new());
        adapter.register_job::<FlakyJob>().await.unwrap();

        let counters = Counters {
            executions: Arc::new(AtomicU32::new(0)),
            fail_first: 2,
        };
        let job_id = adapter.enqueue("default", FlakyJob).await.unwrap();
        let handle = adapter.start_workers(counters.clone(), vec!["default".to_string()]);

        let status = wait_for_terminal(adapter.backend(), &job_id).await;
        handle.shutdown().await.unwrap();

        assert!(matches!(status, JobStatus::Completed { .. }));
        assert_eq!(counters.executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_lets_the_job_in_flight_finish() {
        let adapter = QueueAdapter::new(MemoryBackend::new());
        adapter.register_job::<SlowJob>().await.unwrap();

        let ctx = SlowCtx {
            finished: Arc::new(AtomicU32::new(0)),
        };
        let job_id = adapter.enqueue("default", SlowJob).await.unwrap();
        let handle = adapter.start_workers(ctx.clone(), vec!["default".to_string()]);

        // Let the worker lease the job before asking it to stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await.unwrap();

        assert_eq!(ctx.finished.load(Ordering::SeqCst), 1);
        let status = adapter.backend().get_status(job_id).await.unwrap();
        assert!(matches!(status, JobStatus::Completed { .. }));
    }

    #[tokio::test]
    async fn worker_exhausts_attempts_then_fails() {
        let adapter = QueueAdapter::new(MemoryBackend::new());
        adapter.register_job::<FlakyJob>().await.unwrap();

        let counters = Counters {
            executions: Arc::new(AtomicU32::new(0)),
            fail_first: 10,
        };
        let job_id = adapter.enqueue("default", FlakyJob).await.unwrap();
        let handle = adapter.start_workers(counters.clone(), vec!["default".to_string()]);

        let status = wait_for_terminal(adapter.backend(), &job_id).await;
        handle.shutdown().await.unwrap();

        assert!(matches!(status, JobStatus::Failed { .. }));
        assert_eq!(counters.executions.load(Ordering::SeqCst), 3);

        let record = adapter
            .backend()
            .get_record(job_id)
            .await
            .unwrap();
        assert!(record.last_error.is_some());
    }
}
