use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{JobError, JobMessage, QueueError, QueueResult, RetryPolicy};

/// A unit of background work. Implementations are serialized into the
/// queue and deserialized by whichever worker picks them up, so the
/// payload must be self-contained; shared services arrive through
/// `Context`.
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Shared services handed to every execution
    type Context: Send + Sync + Clone + 'static;

    /// Result of a successful execution
    type Result: Send + Sync + Serialize + 'static;

    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    /// Retry behavior when execution fails with a retryable error
    fn retry_policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Optional idempotency key; two live enqueues with the same key
    /// collapse into one job.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    async fn execute(&self, ctx: Self::Context) -> Result<Self::Result, JobError>;
}

/// Type-erased handler for runtime dispatch
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(
        &self,
        message: &JobMessage,
        context: Arc<dyn std::any::Any + Send + Sync>,
    ) -> Result<(), JobError>;

    fn job_type(&self) -> &'static str;
}

struct ConcreteJobHandler<J: Job> {
    _phantom: std::marker::PhantomData<fn() -> J>,
}

#[async_trait]
impl<J: Job> JobHandler for ConcreteJobHandler<J> {
    async fn execute(
        &self,
        message: &JobMessage,
        context: Arc<dyn std::any::Any + Send + Sync>,
    ) -> Result<(), JobError> {
        let job: J = serde_json::from_slice(&message.payload_bytes)
            .map_err(|e| JobError::Permanent(format!("Failed to deserialize job: {}", e)))?;

        let typed_context = context
            .downcast_ref::<J::Context>()
            .ok_or_else(|| JobError::Permanent("Invalid context type".to_string()))?
            .clone();

        job.execute(typed_context).await?;
        Ok(())
    }

    fn job_type(&self) -> &'static str {
        J::JOB_TYPE
    }
}

/// Registry mapping job types to their handlers
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<J: Job>(&mut self) -> QueueResult<()> {
        let handler = Arc::new(ConcreteJobHandler::<J> {
            _phantom: std::marker::PhantomData,
        });
        let job_type = handler.job_type().to_string();

        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::Internal(format!(
                "Job type '{}' already registered",
                job_type
            )));
        }

        self.handlers.insert(job_type, handler);
        Ok(())
    }

    pub async fn execute_job(
        &self,
        message: &JobMessage,
        context: Arc<dyn std::any::Any + Send + Sync>,
    ) -> Result<(), JobError> {
        let handler = self
            .handlers
            .get(&message.job_type)
            .ok_or_else(|| JobError::Permanent(format!("Unknown job type: {}", message.job_type)))?;

        handler.execute(message, context).await
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
