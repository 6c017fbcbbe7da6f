// Notification facade - queue `notifications-dispatch`, job `notify`
//
// `submit` waits for the stored notification id like every other facade.
// `dispatch` is fire-and-forget: broker mode returns the job id right after
// enqueueing; inline mode writes through the shared store (with retries)
// and returns `None`.

use super::JobQueue;
use crate::application::backend::BackendStrategy;
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsSource;
use crate::domain::{JobDomain, JobError, JobId, NotificationPayload, QueueStats};
use crate::error::Result;
use crate::port::NotificationStore;
use std::sync::Arc;
use std::time::Duration;

pub const NOTIFICATION_MAX_ATTEMPTS: u32 = 3;
pub const NOTIFICATION_BACKOFF: Duration = Duration::from_millis(2000);

pub struct NotificationJobs {
    queue: Arc<JobQueue<NotificationPayload, i64>>,
}

impl NotificationJobs {
    pub fn new(
        backend: Arc<dyn BackendStrategy>,
        policy: RetryPolicy,
        store: Arc<dyn NotificationStore>,
    ) -> Result<Self> {
        let queue = JobQueue::new(JobDomain::Notification, policy, backend, move |payload: NotificationPayload| {
            let store = Arc::clone(&store);
            async move { Ok::<_, JobError>(store.create(&payload).await?) }
        })?;
        Ok(Self {
            queue: Arc::new(queue),
        })
    }

    /// Default policy: 3 attempts, 2000 ms exponential backoff
    pub fn default_policy() -> RetryPolicy {
        RetryPolicy::new(NOTIFICATION_MAX_ATTEMPTS, NOTIFICATION_BACKOFF)
    }

    /// Store the notification and return its id
    pub async fn submit(&self, payload: &NotificationPayload) -> std::result::Result<i64, JobError> {
        self.queue.submit(payload).await
    }

    pub async fn dispatch(
        &self,
        payload: &NotificationPayload,
    ) -> std::result::Result<Option<JobId>, JobError> {
        self.queue.enqueue(payload).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub fn stats_source(&self) -> Arc<dyn StatsSource> {
        self.queue.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::backend::{BrokerBackend, InlineBackend};
    use crate::domain::{NotificationLevel, NotificationType};
    use crate::port::broker::mocks::InMemoryBroker;
    use crate::port::collaborators::mocks::MockNotificationStore;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use tokio::time::Instant;

    fn payload() -> NotificationPayload {
        NotificationPayload::new(
            NotificationType::OcrFailure,
            NotificationLevel::Error,
            "OCR failed for a.pdf",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_dispatch_writes_through_store_with_retries() {
        let store = Arc::new(MockNotificationStore::failing_first(1));
        let jobs = NotificationJobs::new(
            Arc::new(InlineBackend::new()),
            NotificationJobs::default_policy(),
            store.clone(),
        )
        .unwrap();

        let started = Instant::now();
        let id = jobs.dispatch(&payload()).await.unwrap();
        assert_eq!(id, None);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_dispatch_returns_job_id() {
        let store = Arc::new(MockNotificationStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let backend = Arc::new(BrokerBackend::new(
            broker.clone(),
            Arc::new(SequentialIdProvider::default()),
            Arc::new(SystemTimeProvider),
        ));
        let jobs = NotificationJobs::new(backend.clone(), NotificationJobs::default_policy(), store)
            .unwrap();

        let id = jobs.dispatch(&payload()).await.unwrap();
        assert_eq!(id.as_deref(), Some("job-1"));
        assert_eq!(broker.enqueued_count(), 1);
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_submit_returns_stored_id_after_retry() {
        let store = Arc::new(MockNotificationStore::failing_first(1));
        let jobs = NotificationJobs::new(
            Arc::new(InlineBackend::new()),
            NotificationJobs::default_policy(),
            store.clone(),
        )
        .unwrap();

        let id = jobs.submit(&payload()).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_submit_waits_for_stored_id() {
        let store = Arc::new(MockNotificationStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let backend = Arc::new(
            BrokerBackend::new(
                broker.clone(),
                Arc::new(SequentialIdProvider::default()),
                Arc::new(SystemTimeProvider),
            )
            .with_poll_interval(Duration::from_millis(10)),
        );
        let jobs = NotificationJobs::new(backend.clone(), NotificationJobs::default_policy(), store.clone())
            .unwrap();

        let id = tokio::time::timeout(Duration::from_secs(5), jobs.submit(&payload()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.rows().len(), 1);
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }
}
