use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Unique identifier for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease token handed out at dequeue; acknowledgments must present it,
/// so a worker whose lease was reclaimed cannot ack stale work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(pub String);

impl LeaseToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable job submission data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    /// Job type identifier for dispatch
    pub job_type: String,

    /// Serialized job payload (opaque bytes)
    pub payload_bytes: Vec<u8>,

    /// Codec used for serialization
    pub codec: String,

    /// Target queue name
    pub queue: String,

    /// Retry behavior when execution fails
    pub retry: RetryPolicy,

    /// When the job becomes eligible for processing
    pub run_at: DateTime<Utc>,

    /// Optional idempotency key (scoped by queue and job_type)
    pub idempotency_key: Option<String>,
}

impl JobMessage {
    pub fn new(job_type: String, payload_bytes: Vec<u8>, codec: String, queue: String) -> Self {
        Self {
            job_type,
            payload_bytes,
            codec,
            queue,
            retry: RetryPolicy::default(),
            run_at: Utc::now(),
            idempotency_key: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn payload_size(&self) -> usize {
        self.payload_bytes.len()
    }
}

/// Job status lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    /// Queued and waiting to be processed
    Enqueued,

    /// Currently held by a worker under lease
    Processing { lease_until: DateTime<Utc> },

    /// Failed and waiting for its backoff delay to elapse
    Retrying { retry_at: DateTime<Utc> },

    /// Completed successfully
    Completed { completed_at: DateTime<Utc> },

    /// Failed permanently (attempts exhausted or permanent error)
    Failed {
        failed_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Processing { .. } => "processing",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Mutable runtime state of one job, stored by the backend. Terminal
/// records stay around so failures remain inspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub message: JobMessage,
    pub status: JobStatus,

    /// Executions started so far
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub lease_token: Option<LeaseToken>,
    pub lease_until: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: JobId, message: JobMessage) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            message,
            status: JobStatus::Enqueued,
            attempt: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            lease_token: None,
            lease_until: None,
        }
    }

    /// Eligible for dequeue: waiting, and its delay (if any) has elapsed.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match &self.status {
            JobStatus::Enqueued => self.message.run_at <= now,
            JobStatus::Retrying { retry_at } => *retry_at <= now,
            _ => false,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.status, &self.lease_until) {
            (JobStatus::Processing { .. }, Some(lease_until)) => *lease_until < now,
            _ => false,
        }
    }

    pub fn start_processing(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        self.attempt += 1;
        self.status = JobStatus::Processing { lease_until };
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed {
            completed_at: Utc::now(),
        };
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed {
            failed_at: Utc::now(),
            error: error.clone(),
        };
        self.last_error = Some(error);
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }

    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, error: String) {
        self.status = JobStatus::Retrying { retry_at };
        self.last_error = Some(error);
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }
}

/// A job handed to a worker under lease
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub record: JobRecord,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    pub fn job_id(&self) -> &JobId {
        &self.record.job_id
    }

    pub fn message(&self) -> &JobMessage {
        &self.record.message
    }
}

/// Stable event protocol for observing queue activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        queue: String,
        job_type: String,
        at: DateTime<Utc>,
    },
    Leased {
        job_id: JobId,
        lease_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Retrying {
        job_id: JobId,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Leased { .. } => "leased",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Leased { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}
