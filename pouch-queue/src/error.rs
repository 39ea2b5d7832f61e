use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid lease token")]
    InvalidLeaseToken,

    #[error("Lease has expired")]
    LeaseExpired,

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("Job execution failed: {0}")]
    JobFailed(#[from] JobError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Job type not registered: {0}")]
    JobTypeNotRegistered(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Job execution outcome, decides whether the queue schedules a retry
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Retryable error: schedules a retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error: fails immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
