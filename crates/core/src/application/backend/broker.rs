// Broker Backend - jobs persisted in a broker, executed by worker loops
//
// register: per-queue readiness gate + exactly one worker loop
// submit:   gate -> subscribe -> enqueue -> wait for the terminal event
//           bearing the job's id
// stats:    fresh count map over the fixed state set + oldest-wait age

use super::{BackendStrategy, ExecutionMode, JobBinding};
use crate::application::readiness::{ReadinessGate, Resource};
use crate::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
use crate::domain::{JobDomain, JobError, JobEvent, JobId, JobOutcome, JobRecord, JobState, QueueStats};
use crate::error::{AppError, Result};
use crate::port::{Broker, IdProvider, TimeProvider};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::worker::constants::IDLE_SLEEP_DURATION;

struct RegisteredQueue {
    gate: Arc<ReadinessGate>,
}

pub struct BrokerBackend {
    broker: Arc<dyn Broker>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    poll_interval: Duration,
    queues: Mutex<HashMap<JobDomain, RegisteredQueue>>,
    workers: Mutex<Vec<(JobDomain, JoinHandle<()>)>>,
    shutdown_tx: ShutdownSender,
    shutdown_token: ShutdownToken,
}

impl BrokerBackend {
    pub fn new(
        broker: Arc<dyn Broker>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (shutdown_tx, shutdown_token) = shutdown_channel();
        Self {
            broker,
            id_provider,
            time_provider,
            poll_interval: IDLE_SLEEP_DURATION,
            queues: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_token,
        }
    }

    /// Worker idle poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    fn gate(&self, domain: JobDomain) -> std::result::Result<Arc<ReadinessGate>, JobError> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get(&domain)
            .map(|q| Arc::clone(&q.gate))
            .ok_or_else(|| JobError::unavailable(domain.label(), "queue is not registered"))
    }

    fn spawn_worker(&self, binding: &JobBinding, started_tx: oneshot::Sender<()>) -> JoinHandle<()> {
        let worker = Worker::new(
            binding.domain.queue_name(),
            Arc::clone(&self.broker),
            Arc::clone(&binding.handler),
            Arc::clone(&self.time_provider),
        )
        .with_idle_sleep(self.poll_interval);
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            if let Err(e) = worker.start().await {
                error!(queue = worker.queue(), error = %e, "Worker failed to start");
                return;
            }
            let _ = started_tx.send(());
            if let Err(e) = worker.run(shutdown).await {
                error!(queue = worker.queue(), error = %e, "Worker failed");
            }
        })
    }

    async fn enqueue_record(
        &self,
        binding: &JobBinding,
        payload: Value,
    ) -> std::result::Result<JobId, JobError> {
        let domain = binding.domain;
        let record = JobRecord::new(
            self.id_provider.generate_id(),
            domain.queue_name(),
            domain.job_name(),
            payload,
            binding.policy.job_options(),
            self.time_provider.now_millis(),
        );
        self.broker
            .enqueue(&record)
            .await
            .map_err(|e| JobError::unavailable(domain.label(), e.to_string()))?;
        info!(queue = domain.queue_name(), job_id = %record.id, "Job enqueued");
        Ok(record.id)
    }

    async fn wait_for_outcome(
        &self,
        domain: JobDomain,
        job_id: &JobId,
        events: &mut broadcast::Receiver<JobEvent>,
    ) -> std::result::Result<Value, JobError> {
        loop {
            match events.recv().await {
                Ok(event) if &event.job_id == job_id => {
                    return outcome_to_result(domain, event.outcome);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(queue = domain.queue_name(), job_id = %job_id, skipped, "Event stream lagged");
                    let record = self
                        .broker
                        .find(domain.queue_name(), job_id)
                        .await
                        .map_err(|e| JobError::unavailable(domain.label(), e.to_string()))?;
                    match record {
                        Some(record) if record.state.is_terminal() => {
                            if let Some(event) = JobEvent::from_record(&record) {
                                return outcome_to_result(domain, event.outcome);
                            }
                        }
                        Some(_) => continue,
                        // Removed on completion while we were lagging
                        None => {
                            return Err(JobError::unavailable(
                                domain.label(),
                                format!("completion event for job {job_id} was lost"),
                            ))
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(JobError::unavailable(domain.label(), "event stream closed"));
                }
            }
        }
    }
}

fn outcome_to_result(domain: JobDomain, outcome: JobOutcome) -> std::result::Result<Value, JobError> {
    match outcome {
        JobOutcome::Completed { result } => Ok(result),
        JobOutcome::Failed {
            reason,
            attempts_made,
        } => Err(JobError::terminal(domain.label(), reason, attempts_made)),
    }
}

#[async_trait]
impl BackendStrategy for BrokerBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Broker
    }

    fn register(&self, binding: Arc<JobBinding>) -> Result<()> {
        let domain = binding.domain;
        let queue = domain.queue_name();
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(&domain) {
            return Err(AppError::Conflict(format!("worker for queue {queue} is already registered")));
        }

        let (started_tx, started_rx) = oneshot::channel();
        let handle = self.spawn_worker(&binding, started_tx);

        let broker_ready: Resource = {
            let broker = Arc::clone(&self.broker);
            async move { broker.wait_until_ready().await }.boxed()
        };
        let worker_started: Resource = async move {
            started_rx
                .await
                .map_err(|_| AppError::Unavailable(format!("worker for {queue} exited before start")))
        }
        .boxed();
        let events_listening: Resource = {
            let broker = Arc::clone(&self.broker);
            async move { broker.subscribe(queue).await.map(|_| ()) }.boxed()
        };

        queues.insert(
            domain,
            RegisteredQueue {
                gate: Arc::new(ReadinessGate::new(
                    queue,
                    vec![broker_ready, worker_started, events_listening],
                )),
            },
        );
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((domain, handle));

        info!(queue = queue, "Registered broker queue");
        Ok(())
    }

    async fn await_ready(&self, domain: JobDomain) -> Result<()> {
        let gate = self
            .gate(domain)
            .map_err(|e| AppError::Unavailable(e.to_string()))?;
        gate.wait().await
    }

    async fn submit(&self, binding: &JobBinding, payload: Value) -> std::result::Result<Value, JobError> {
        let domain = binding.domain;
        let gate = self.gate(domain)?;
        gate.wait()
            .await
            .map_err(|e| JobError::unavailable(domain.label(), e.to_string()))?;

        // Subscribe before enqueueing so a fast worker cannot beat us
        let mut events = self
            .broker
            .subscribe(domain.queue_name())
            .await
            .map_err(|e| JobError::unavailable(domain.label(), e.to_string()))?;
        let job_id = self.enqueue_record(binding, payload).await?;
        self.wait_for_outcome(domain, &job_id, &mut events).await
    }

    async fn enqueue(
        &self,
        binding: &JobBinding,
        payload: Value,
    ) -> std::result::Result<Option<JobId>, JobError> {
        let domain = binding.domain;
        let gate = self.gate(domain)?;
        gate.wait()
            .await
            .map_err(|e| JobError::unavailable(domain.label(), e.to_string()))?;
        self.enqueue_record(binding, payload).await.map(Some)
    }

    async fn stats(&self, domain: JobDomain) -> Result<QueueStats> {
        let queue = domain.queue_name();
        let mut counts = BTreeMap::new();
        for state in JobState::ALL {
            counts.insert(state, self.broker.count_by_state(queue, state).await?);
        }

        let waiting_duration = self
            .broker
            .oldest_queued_at(queue)
            .await?
            .map(|enqueued_at| {
                let age = self.time_provider.now_millis().saturating_sub(enqueued_at).max(0);
                Duration::from_millis(age as u64)
            });

        Ok(QueueStats::enabled(counts, waiting_duration))
    }

    async fn shutdown(&self, grace: Duration) -> Result<()> {
        info!(grace_ms = grace.as_millis() as u64, "Stopping broker workers");
        self.shutdown_tx.shutdown();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        let deadline = tokio::time::Instant::now() + grace;
        for (domain, mut handle) in workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(queue = domain.queue_name(), "Worker did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }

        self.broker.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::retry::RetryPolicy;
    use crate::port::broker::mocks::InMemoryBroker;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::job_handler::mocks::FlakyHandler;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::JobHandler;
    use serde_json::json;

    fn backend(broker: Arc<InMemoryBroker>) -> BrokerBackend {
        BrokerBackend::new(
            broker,
            Arc::new(SequentialIdProvider::default()),
            Arc::new(SystemTimeProvider),
        )
        .with_poll_interval(Duration::from_millis(5))
    }

    fn binding(domain: JobDomain, handler: Arc<dyn JobHandler>, attempts: u32) -> Arc<JobBinding> {
        Arc::new(JobBinding::new(
            domain,
            RetryPolicy::new(attempts, Duration::from_millis(20)),
            handler,
        ))
    }

    #[tokio::test]
    async fn test_submit_waits_for_worker_result() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = backend(broker.clone());
        let b = binding(JobDomain::Pdf, Arc::new(FlakyHandler::succeeding()), 1);
        backend.register(b.clone()).unwrap();

        let out = backend.submit(&b, json!("invoice-7")).await.unwrap();
        assert_eq!(out, json!("invoice-7"));
        // Completed records are removed from storage
        assert_eq!(broker.count_by_state("invoice-pdf", JobState::Completed).await.unwrap(), 0);
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn test_always_failing_reports_attempts() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = backend(broker.clone());
        let handler = Arc::new(FlakyHandler::always_failing("source file for OCR not found"));
        let b = binding(JobDomain::Ocr, handler.clone(), 3);
        backend.register(b.clone()).unwrap();

        let err = backend.submit(&b, json!({})).await.unwrap_err();
        assert_eq!(handler.calls(), 3);
        assert_eq!(err.attempts(), Some(3));
        assert!(err.to_string().ends_with("(after 3 attempts)"));

        let failed = broker.list_by_state("ocr-process", JobState::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_once_then_succeed() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = backend(broker);
        let handler = Arc::new(FlakyHandler::new(1, "flaky"));
        let b = binding(JobDomain::Notification, handler.clone(), 3);
        backend.register(b.clone()).unwrap();

        let out = backend.submit(&b, json!({"n": 1})).await.unwrap();
        assert_eq!(out, json!({"n": 1}));
        assert_eq!(handler.calls(), 2);
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_registration_rejected() {
        let backend = backend(Arc::new(InMemoryBroker::new()));
        let b = binding(JobDomain::Isdoc, Arc::new(FlakyHandler::succeeding()), 1);
        backend.register(b.clone()).unwrap();
        let err = backend.register(b).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_unavailable() {
        let broker = Arc::new(InMemoryBroker::unreachable());
        let backend = backend(broker.clone());
        let b = binding(JobDomain::Pohoda, Arc::new(FlakyHandler::succeeding()), 1);
        backend.register(b.clone()).unwrap();

        let err = backend.submit(&b, json!({})).await.unwrap_err();
        assert!(matches!(err, JobError::Unavailable { .. }));
        assert_eq!(broker.enqueued_count(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_returns_id_without_waiting() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = backend(broker.clone());
        let b = binding(JobDomain::Notification, Arc::new(FlakyHandler::succeeding()), 3);
        backend.register(b.clone()).unwrap();

        let id = backend.enqueue(&b, json!({"message": "hi"})).await.unwrap();
        assert_eq!(id.as_deref(), Some("job-1"));
        assert_eq!(broker.enqueued_count(), 1);
        backend.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_are_idempotent() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = backend(broker.clone());
        broker
            .enqueue(&JobRecord::new("queued-1", "invoice-pdf", "generate", json!({}), Default::default(), 0))
            .await
            .unwrap();

        let first = backend.stats(JobDomain::Pdf).await.unwrap();
        let second = backend.stats(JobDomain::Pdf).await.unwrap();
        assert!(first.enabled);
        assert_eq!(first.counts, second.counts);
        assert_eq!(first.counts.len(), JobState::ALL.len());
        assert_eq!(first.count(JobState::Queued), 1);
        assert!(first.waiting_duration.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_closes_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = backend(broker.clone());
        backend
            .register(binding(JobDomain::Pdf, Arc::new(FlakyHandler::succeeding()), 1))
            .unwrap();
        backend.await_ready(JobDomain::Pdf).await.unwrap();

        backend.shutdown(Duration::from_millis(500)).await.unwrap();
        assert!(broker.is_closed());
    }
}
