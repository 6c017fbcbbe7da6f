// Readiness Gate
//
// Broker-backed resources (queue handle, worker loop, event stream) come
// up asynchronously. A facade awaits its gate before the first enqueue;
// the outcome is memoized, so later submits pass straight through.

use crate::error::{AppError, Result};
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use std::time::Duration;
use tracing::{debug, error};

/// One resource that must come up before the gate opens
pub type Resource = BoxFuture<'static, Result<()>>;

type Outcome = std::result::Result<(), String>;

/// Await every resource; the first failure wins
pub async fn await_ready(resources: Vec<Resource>) -> Result<()> {
    try_join_all(resources).await.map(|_| ())
}

/// Memoized readiness of one queue
///
/// The resources live inside a `Shared` future: whichever waiter polls it
/// drives them, and a waiter that gives up (timeout, dropped submit)
/// leaves the progress in place for the next one.
pub struct ReadinessGate {
    name: String,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

impl ReadinessGate {
    pub fn new(name: impl Into<String>, resources: Vec<Resource>) -> Self {
        let name = name.into();
        let queue = name.clone();
        let outcome = async move {
            match await_ready(resources).await {
                Ok(()) => {
                    debug!(queue = %queue, "Queue resources ready");
                    Ok(())
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Queue failed to start");
                    Err(e.to_string())
                }
            }
        }
        .boxed()
        .shared();

        Self { name, outcome }
    }

    /// A gate with nothing to wait for
    pub fn open(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Wait for the gate
    pub async fn wait(&self) -> Result<()> {
        self.outcome
            .clone()
            .await
            .map_err(|reason| AppError::Unavailable(format!("{}: {}", self.name, reason)))
    }

    /// `wait` bounded by `timeout`
    pub async fn await_ready_within(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Unavailable(format!(
                "{}: not ready within {}ms",
                self.name,
                timeout.as_millis()
            ))),
        }
    }

    /// Whether the gate has opened successfully
    pub fn is_ready(&self) -> bool {
        matches!(self.outcome.peek(), Some(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_await_ready_all_resources() {
        let resources: Vec<Resource> = vec![async { Ok(()) }.boxed(), async { Ok(()) }.boxed()];
        assert!(await_ready(resources).await.is_ok());
    }

    #[tokio::test]
    async fn test_first_failure_propagates() {
        let resources: Vec<Resource> = vec![
            async { Ok(()) }.boxed(),
            async { Err(AppError::Broker("connection refused".to_string())) }.boxed(),
        ];
        let err = await_ready(resources).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_gate_memoizes_outcome() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let gate = ReadinessGate::new(
            "invoice-pdf",
            vec![async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()],
        );

        gate.wait().await.unwrap();
        gate.wait().await.unwrap();
        assert!(gate.is_ready());
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_gate_stays_failed() {
        let gate = ReadinessGate::new(
            "ocr-process",
            vec![async { Err(AppError::Broker("NOAUTH".to_string())) }.boxed()],
        );
        let first = gate.wait().await.unwrap_err();
        let second = gate.wait().await.unwrap_err();
        assert!(matches!(first, AppError::Unavailable(_)));
        assert_eq!(first.to_string(), second.to_string());
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_ready_within_times_out() {
        let gate = ReadinessGate::new("invoice-isdoc", vec![futures::future::pending::<Result<()>>().boxed()]);
        let err = gate
            .await_ready_within(Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not ready within 30000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_waiter_keeps_resources_pending() {
        let (release, signal) = tokio::sync::oneshot::channel::<Result<()>>();
        let gate = ReadinessGate::new(
            "ocr-process",
            vec![async move {
                signal
                    .await
                    .unwrap_or_else(|_| Err(AppError::Broker("dropped".to_string())))
            }
            .boxed()],
        );

        assert!(gate.await_ready_within(Duration::from_secs(1)).await.is_err());
        assert!(!gate.is_ready());
        assert!(gate.await_ready_within(Duration::from_secs(1)).await.is_err());
        assert!(!gate.is_ready());

        release
            .send(Err(AppError::Broker("connection refused".to_string())))
            .unwrap();
        let err = gate.wait().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(!gate.is_ready());
    }
}
