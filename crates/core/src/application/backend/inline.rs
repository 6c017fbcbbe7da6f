// Inline Backend - no broker configured
//
// The job body runs in the caller's own task. Failed attempts sleep
// `base_backoff * 2^(attempt-1)` before the next one; exhaustion yields a
// terminal error carrying the literal attempt count.

use super::{BackendStrategy, ExecutionMode, JobBinding};
use crate::domain::{JobDomain, JobError, JobId, QueueStats};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct InlineBackend;

impl InlineBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run_with_retry(
        &self,
        binding: &JobBinding,
        payload: Value,
    ) -> std::result::Result<Value, JobError> {
        let label = binding.domain.label();
        let max_attempts = binding.policy.max_attempts();
        let mut last_message = String::new();

        for attempt in 1..=max_attempts {
            match binding.handler.handle(payload.clone()).await {
                Ok(result) => {
                    debug!(queue = binding.domain.queue_name(), attempt, "Inline job succeeded");
                    return Ok(result);
                }
                Err(err @ JobError::InvalidPayload { .. }) => return Err(err),
                Err(err) => {
                    last_message = err.message().to_string();
                    if attempt < max_attempts {
                        let delay = binding.policy.backoff_for(attempt);
                        warn!(
                            queue = binding.domain.queue_name(),
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_message,
                            "Inline job attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            queue = binding.domain.queue_name(),
            attempts = max_attempts,
            error = %last_message,
            "Inline job failed"
        );
        Err(JobError::terminal(label, last_message, max_attempts))
    }
}

#[async_trait]
impl BackendStrategy for InlineBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Inline
    }

    fn register(&self, binding: Arc<JobBinding>) -> Result<()> {
        debug!(queue = binding.domain.queue_name(), "Registered inline job");
        Ok(())
    }

    async fn await_ready(&self, _domain: JobDomain) -> Result<()> {
        Ok(())
    }

    async fn submit(&self, binding: &JobBinding, payload: Value) -> std::result::Result<Value, JobError> {
        self.run_with_retry(binding, payload).await
    }

    async fn enqueue(
        &self,
        binding: &JobBinding,
        payload: Value,
    ) -> std::result::Result<Option<JobId>, JobError> {
        self.run_with_retry(binding, payload).await.map(|_| None)
    }

    async fn stats(&self, _domain: JobDomain) -> Result<QueueStats> {
        Ok(QueueStats::disabled())
    }

    async fn shutdown(&self, _grace: Duration) -> Result<()> {
        Ok(())
    }
}
