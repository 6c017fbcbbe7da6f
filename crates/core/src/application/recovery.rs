// Stalled job recovery
use crate::domain::JobState;
use crate::port::{Broker, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::worker::constants::DEFAULT_RECOVERY_WINDOW_MS;

/// Stalled job recovery service
///
/// A worker that crashes mid-job leaves its record `active` forever. On
/// worker start, records active for longer than the recovery window are
/// put back in the queue, so delivery stays at-least-once.
pub struct RecoveryService {
    broker: Arc<dyn Broker>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window_ms: i64,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Arguments
    /// * `broker` - Broker holding the records
    /// * `time_provider` - Time provider
    /// * `recovery_window_ms` - Optional custom recovery window (default: 5 minutes)
    pub fn new(
        broker: Arc<dyn Broker>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window_ms: Option<i64>,
    ) -> Self {
        Self {
            broker,
            time_provider,
            recovery_window_ms: recovery_window_ms.unwrap_or(DEFAULT_RECOVERY_WINDOW_MS),
        }
    }

    /// Requeue stalled records of `queue`
    ///
    /// Algorithm:
    /// 1. List active records
    /// 2. Records started before `now - recovery_window` (or with no start
    ///    time at all) go back to `queued` without counting an attempt
    ///
    /// # Returns
    /// Number of records recovered
    pub async fn recover_stalled_jobs(&self, queue: &str) -> crate::error::Result<usize> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.recovery_window_ms;

        let active = self.broker.list_by_state(queue, JobState::Active).await?;
        let mut recovered_count = 0;

        for mut job in active {
            let stalled = match job.started_at {
                Some(started_at) => started_at < cutoff,
                None => {
                    warn!(job_id = %job.id, queue = %queue, "Active job without started_at");
                    true
                }
            };
            if !stalled {
                continue;
            }

            info!(
                job_id = %job.id,
                queue = %queue,
                started_at = ?job.started_at,
                cutoff = %cutoff,
                "Requeueing stalled job"
            );
            job.requeue(now)?;
            self.broker.update(&job).await?;
            recovered_count += 1;
        }

        if recovered_count > 0 {
            info!(queue = %queue, recovered_count = %recovered_count, "Stalled job recovery complete");
        }
        Ok(recovered_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobOptions, JobRecord};
    use crate::port::broker::mocks::InMemoryBroker;
    use crate::port::time_provider::FixedTimeProvider;
    use serde_json::json;

    #[tokio::test]
    async fn test_requeues_only_stalled_jobs() {
        let broker = Arc::new(InMemoryBroker::new());
        let clock = Arc::new(FixedTimeProvider::new(0));

        for id in ["old", "fresh"] {
            broker
                .enqueue(&JobRecord::new(id, "invoice-pdf", "generate", json!({}), JobOptions::default(), 0))
                .await
                .unwrap();
        }
        // "old" claimed at t=0, "fresh" at t=9min
        broker.claim_next("invoice-pdf", 0).await.unwrap();
        broker.claim_next("invoice-pdf", 9 * 60 * 1000).await.unwrap();

        clock.advance(10 * 60 * 1000);
        let recovery = RecoveryService::new(broker.clone(), clock, None);
        let recovered = recovery.recover_stalled_jobs("invoice-pdf").await.unwrap();

        assert_eq!(recovered, 1);
        let old = broker.find("invoice-pdf", &"old".to_string()).await.unwrap().unwrap();
        assert_eq!(old.state, JobState::Queued);
        assert_eq!(old.attempts_made, 0);
        let fresh = broker.find("invoice-pdf", &"fresh".to_string()).await.unwrap().unwrap();
        assert_eq!(fresh.state, JobState::Active);
    }

    #[tokio::test]
    async fn test_nothing_to_recover() {
        let broker = Arc::new(InMemoryBroker::new());
        let clock = Arc::new(FixedTimeProvider::new(1_000));
        let recovery = RecoveryService::new(broker, clock, Some(1));
        assert_eq!(recovery.recover_stalled_jobs("ocr-process").await.unwrap(), 0);
    }
}
