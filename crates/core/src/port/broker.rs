// Broker Port (Interface)
//
// Broker-native primitives used by the BrokerBackend and its workers.
// Implementations: SqliteBroker (infra-sqlite), RedisBroker (infra-redis),
// InMemoryBroker (below, for tests).

use crate::domain::{JobEvent, JobId, JobRecord, JobState};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Receiving end of a queue's event stream
pub type EventReceiver = broadcast::Receiver<JobEvent>;

/// Capacity of per-queue event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Resolve once the broker connection / queue storage is usable
    async fn wait_until_ready(&self) -> Result<()>;

    /// Persist a new queued record
    async fn enqueue(&self, record: &JobRecord) -> Result<()>;

    /// Atomically claim the next claimable record of `queue` (FIFO by
    /// availability), returning it already transitioned to Active
    async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<JobRecord>>;

    /// Persist a non-terminal transition (retry delay, stalled requeue)
    async fn update(&self, record: &JobRecord) -> Result<()>;

    /// Persist a terminal record and publish its event.
    ///
    /// Honors `remove_on_complete` / `remove_on_fail`: a removed record is
    /// gone from storage but its event is still published.
    async fn finish(&self, record: &JobRecord) -> Result<()>;

    /// Snapshot of one record
    async fn find(&self, queue: &str, id: &JobId) -> Result<Option<JobRecord>>;

    /// All records of `queue` in `state` (oldest first)
    async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>>;

    /// Count records of `queue` in `state`
    async fn count_by_state(&self, queue: &str, state: JobState) -> Result<u64>;

    /// Enqueue time of the oldest queued record, if any
    async fn oldest_queued_at(&self, queue: &str) -> Result<Option<i64>>;

    /// Subscribe to terminal events of `queue`.
    ///
    /// Resolves once the listener is live: events published after this
    /// returns are delivered to the receiver.
    async fn subscribe(&self, queue: &str) -> Result<EventReceiver>;

    /// Release connections and stop background listeners
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Mock implementation for testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Single-process broker keeping records in a map
    ///
    /// Mirrors the persistence semantics of the real adapters (removal on
    /// completion, retention on failure, FIFO claims) so the BrokerBackend
    /// can be exercised without a database.
    pub struct InMemoryBroker {
        records: Mutex<HashMap<JobId, JobRecord>>,
        order: Mutex<Vec<JobId>>,
        channels: Mutex<HashMap<String, broadcast::Sender<JobEvent>>>,
        ready: bool,
        closed: AtomicBool,
        enqueued: AtomicUsize,
    }

    impl InMemoryBroker {
        pub fn new() -> Self {
            Self::with_readiness(true)
        }

        /// Broker whose `wait_until_ready` fails (connection refused)
        pub fn unreachable() -> Self {
            Self::with_readiness(false)
        }

        fn with_readiness(ready: bool) -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                order: Mutex::new(Vec::new()),
                channels: Mutex::new(HashMap::new()),
                ready,
                closed: AtomicBool::new(false),
                enqueued: AtomicUsize::new(0),
            }
        }

        /// Number of records ever enqueued
        pub fn enqueued_count(&self) -> usize {
            self.enqueued.load(Ordering::SeqCst)
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn sender(&self, queue: &str) -> broadcast::Sender<JobEvent> {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .entry(queue.to_string())
                .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
                .clone()
        }

        fn ensure_open(&self) -> Result<()> {
            if self.is_closed() {
                return Err(AppError::Broker("broker is closed".to_string()));
            }
            Ok(())
        }
    }

    impl Default for InMemoryBroker {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Broker for InMemoryBroker {
        async fn wait_until_ready(&self) -> Result<()> {
            if !self.ready {
                return Err(AppError::Broker("connection refused".to_string()));
            }
            Ok(())
        }

        async fn enqueue(&self, record: &JobRecord) -> Result<()> {
            self.ensure_open()?;
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            if records.contains_key(&record.id) {
                return Err(AppError::Conflict(format!("job {} already exists", record.id)));
            }
            records.insert(record.id.clone(), record.clone());
            self.order
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record.id.clone());
            self.enqueued.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<JobRecord>> {
            self.ensure_open()?;
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let order = self.order.lock().unwrap_or_else(|e| e.into_inner());

            let next = order
                .iter()
                .filter_map(|id| records.get(id))
                .filter(|r| r.queue == queue && r.is_claimable(now_millis))
                .min_by_key(|r| (r.available_at, r.enqueued_at))
                .map(|r| r.id.clone());

            match next.and_then(|id| records.get_mut(&id)) {
                Some(record) => {
                    record.activate(now_millis)?;
                    Ok(Some(record.clone()))
                }
                None => Ok(None),
            }
        }

        async fn update(&self, record: &JobRecord) -> Result<()> {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            match records.get_mut(&record.id) {
                Some(existing) => {
                    *existing = record.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("job {}", record.id))),
            }
        }

        async fn finish(&self, record: &JobRecord) -> Result<()> {
            let event = JobEvent::from_record(record).ok_or_else(|| {
                AppError::Internal(format!("job {} is not terminal", record.id))
            })?;
            let remove = match record.state {
                JobState::Completed => record.options.remove_on_complete,
                _ => record.options.remove_on_fail,
            };
            {
                let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
                if remove {
                    records.remove(&record.id);
                    self.order
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .retain(|id| id != &record.id);
                } else {
                    records.insert(record.id.clone(), record.clone());
                }
            }
            // No receivers is fine: fire-and-forget submissions never wait
            let _ = self.sender(&record.queue).send(event);
            Ok(())
        }

        async fn find(&self, queue: &str, id: &JobId) -> Result<Option<JobRecord>> {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records.get(id).filter(|r| r.queue == queue).cloned())
        }

        async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>> {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let mut matching: Vec<JobRecord> = records
                .values()
                .filter(|r| r.queue == queue && r.state == state)
                .cloned()
                .collect();
            matching.sort_by_key(|r| r.enqueued_at);
            Ok(matching)
        }

        async fn count_by_state(&self, queue: &str, state: JobState) -> Result<u64> {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records
                .values()
                .filter(|r| r.queue == queue && r.state == state)
                .count() as u64)
        }

        async fn oldest_queued_at(&self, queue: &str) -> Result<Option<i64>> {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            Ok(records
                .values()
                .filter(|r| r.queue == queue && r.state == JobState::Queued)
                .map(|r| r.enqueued_at)
                .min())
        }

        async fn subscribe(&self, queue: &str) -> Result<EventReceiver> {
            self.wait_until_ready().await?;
            self.ensure_open()?;
            Ok(self.sender(queue).subscribe())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.channels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            Ok(())
        }
    }

}
