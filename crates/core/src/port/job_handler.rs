// Job Handler Port
//
// A job body in its serialized form. Facades adapt their typed bodies to
// this shape so both backends can run them without knowing the domain.

use crate::domain::JobError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of the job body
    ///
    /// `Err(JobError::Transient)` marks the attempt as failed; the backend
    /// owns the retry decision.
    async fn handle(&self, payload: Value) -> Result<Value, JobError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync,
{
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        (self.f)(payload).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: move |payload: Value| -> BoxFuture<'static, Result<Value, JobError>> { Box::pin(f(payload)) },
    })
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Handler failing the first `failures` calls, then echoing the payload
    pub struct FlakyHandler {
        failures: u32,
        message: String,
        calls: AtomicU32,
        payloads: Mutex<Vec<Value>>,
    }

    impl FlakyHandler {
        pub fn new(failures: u32, message: impl Into<String>) -> Self {
            Self {
                failures,
                message: message.into(),
                calls: AtomicU32::new(0),
                payloads: Mutex::new(Vec::new()),
            }
        }

        /// Never succeeds
        pub fn always_failing(message: impl Into<String>) -> Self {
            Self::new(u32::MAX, message)
        }

        /// Succeeds on the first call
        pub fn succeeding() -> Self {
            Self::new(0, "")
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn payloads(&self) -> Vec<Value> {
            self.payloads.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, payload: Value) -> Result<Value, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.payloads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(payload.clone());
            if call <= self.failures {
                return Err(JobError::transient(self.message.clone()));
            }
            Ok(payload)
        }
    }

    /// Handler that panics on every call
    pub struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        async fn handle(&self, _payload: Value) -> Result<Value, JobError> {
            panic!("handler exploded");
        }
    }
}
