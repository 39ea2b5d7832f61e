//! # pouch-queue: durable background jobs with at-least-once delivery
//!
//! A lease-based job queue: producers enqueue serialized job payloads,
//! workers lease one job at a time, and a failed or crashed worker's
//! lease eventually expires so another worker can pick the job up.
//! Retry scheduling is exponential backoff driven by each job type's
//! [`RetryPolicy`]; a job that exhausts its attempts lands in `Failed`
//! where its record stays inspectable.
//!
//! The storage primitives live behind [`backend::QueueBackend`];
//! [`adapter::QueueAdapter`] layers typed enqueue, the job registry,
//! and the worker loop on top.

pub mod adapter;
pub mod backend;
pub mod error;
pub mod job;
pub mod retry;
pub mod types;

pub use adapter::{QueueAdapter, QueueConfig, WorkerHandle};
pub use backend::memory::{LeaseReaper, MemoryBackend};
pub use backend::QueueBackend;
pub use error::{JobError, QueueError, QueueResult};
pub use job::{Job, JobRegistry};
pub use retry::RetryPolicy;
pub use types::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, LeaseToken, LeasedJob};
