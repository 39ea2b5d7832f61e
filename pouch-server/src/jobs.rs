use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pouch_blob::{AssetType, CompletionEvent, ObjectStore};
use pouch_queue::{Job, JobError, RetryPolicy};

use crate::cache::OnboardCache;
use crate::users::UserRepository;

/// Queue that carries asset completion jobs
pub const ASSETS_QUEUE: &str = "assets";

/// Queue that carries outbound email jobs
pub const EMAILS_QUEUE: &str = "emails";

/// Shared services every worker job executes against.
#[derive(Clone)]
pub struct WorkerContext {
    pub users: Arc<dyn UserRepository>,
    pub cache: Arc<dyn OnboardCache>,
    pub objects: Arc<dyn ObjectStore>,
    pub mailer: Arc<dyn Mailer>,
    pub url_ttl: Duration,
}

/// Applies a finished upload to the owning user: stamps the durable
/// path onto the profile, then refreshes the onboarding cache with a
/// presigned URL.
///
/// The profile write is the must-succeed half; any failure there is
/// reported retryable so the queue re-delivers. The cache refresh is
/// best effort and never fails the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCompletionJob {
    pub user_id: String,
    pub asset_type: AssetType,
    pub path: String,
}

impl From<CompletionEvent> for AssetCompletionJob {
    fn from(event: CompletionEvent) -> Self {
        Self {
            user_id: event.user_id,
            asset_type: event.asset_type,
            path: event.path,
        }
    }
}

impl AssetCompletionJob {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.user_id, self.asset_type)
    }
}

#[async_trait]
impl Job for AssetCompletionJob {
    type Context = WorkerContext;
    type Result = ();

    const JOB_TYPE: &'static str = "asset_completion";

    fn retry_policy() -> RetryPolicy {
        RetryPolicy::new(3, 1_000)
    }

    // One live job per finished object; redeliveries collapse.
    fn idempotency_key(&self) -> Option<String> {
        Some(format!("{}:{}:{}", self.user_id, self.asset_type, self.path))
    }

    async fn execute(&self, ctx: Self::Context) -> Result<(), JobError> {
        ctx.users
            .set_asset_url(&self.user_id, self.asset_type, self.path.clone())
            .await
            .map_err(|e| JobError::retryable(format!("user update failed: {}", e)))?;

        info!(
            user_id = %self.user_id,
            asset_type = %self.asset_type,
            path = %self.path,
            "applied completed asset to user"
        );

        match ctx
            .objects
            .presign_get(self.asset_type.bucket(), &self.path, ctx.url_ttl)
            .await
        {
            Ok(presigned) => {
                if let Err(e) = ctx
                    .cache
                    .set(&self.cache_key(), presigned.url, ctx.url_ttl)
                    .await
                {
                    warn!(user_id = %self.user_id, error = %e, "cache refresh failed");
                }
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "presign failed, cache not refreshed");
            }
        }

        Ok(())
    }
}

/// Outbound mail delivery seam.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Mailer that only logs; the default in development.
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        info!(to, subject, "email sent (logging mailer)");
        Ok(())
    }
}

/// Sends one email through the configured mailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
impl Job for EmailJob {
    type Context = WorkerContext;
    type Result = ();

    const JOB_TYPE: &'static str = "send_email";

    async fn execute(&self, ctx: Self::Context) -> Result<(), JobError> {
        ctx.mailer
            .send(&self.to, &self.subject, &self.body)
            .await
            .map_err(|e| JobError::retryable(format!("mail delivery failed: {}", e)))
    }
}
