use async_trait::async_trait;

use pouch_blob::{BlobError, BlobResult, CompletionEvent, CompletionSink};
use pouch_queue::{QueueAdapter, QueueBackend};

use crate::jobs::{AssetCompletionJob, ASSETS_QUEUE};

/// Publishes completion events by enqueuing an [`AssetCompletionJob`].
/// Enqueue failures surface as backend errors so the gateway can park
/// the event in its outbox.
pub struct QueueCompletionSink<B: QueueBackend + Send + Sync + 'static> {
    queue: QueueAdapter<B>,
}

impl<B: QueueBackend + Send + Sync + 'static> QueueCompletionSink<B> {
    pub fn new(queue: QueueAdapter<B>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl<B: QueueBackend + Send + Sync + 'static> CompletionSink for QueueCompletionSink<B> {
    async fn publish(&self, event: CompletionEvent) -> BlobResult<()> {
        let job = AssetCompletionJob::from(event);
        self.queue
            .enqueue(ASSETS_QUEUE, job)
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pouch_blob::AssetType;
    use pouch_queue::{JobStatus, MemoryBackend};

    #[tokio::test]
    async fn publish_enqueues_a_completion_job() {
        let adapter = QueueAdapter::new(MemoryBackend::new());
        let sink = QueueCompletionSink::new(adapter.clone());

        sink.publish(CompletionEvent {
            user_id: "u-1".to_string(),
            asset_type: AssetType::Avatar,
            path: "tok/a.png".to_string(),
        })
        .await
        .unwrap();

        let leased = adapter
            .backend()
            .dequeue(&[ASSETS_QUEUE])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.message().job_type, "asset_completion");
        assert!(matches!(
            leased.record.status,
            JobStatus::Processing { .. }
        ));
    }
}
