// Worker - broker job execution loop

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::recovery::RecoveryService;
use crate::application::retry::{jittered, RetryDecision, RetryPolicy};
use crate::domain::{JobError, JobRecord};
use crate::error::Result;
use crate::port::{Broker, JobHandler, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Worker processes records of one broker queue
pub struct Worker {
    queue: String,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn JobHandler>,
    time_provider: Arc<dyn TimeProvider>,
    idle_sleep: Duration,
}

impl Worker {
    pub fn new(
        queue: impl Into<String>,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn JobHandler>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            handler,
            time_provider,
            idle_sleep: IDLE_SLEEP_DURATION,
        }
    }

    /// Override the idle poll interval
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the broker and recover stalled records
    ///
    /// Recovery failures are logged; only an unreachable broker fails.
    pub async fn start(&self) -> Result<()> {
        self.broker.wait_until_ready().await?;

        let recovery = RecoveryService::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.time_provider),
            None,
        );
        if let Err(e) = recovery.recover_stalled_jobs(&self.queue).await {
            error!(queue = %self.queue, error = %e, "Stalled job recovery failed");
        }
        Ok(())
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// Shutdown stops claiming; a job already claimed runs to completion.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(queue = %self.queue, "Worker started");
        loop {
            // Check for shutdown signal
            if shutdown.is_shutdown() {
                info!(queue = %self.queue, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // No job available, sleep briefly (or wait for shutdown)
                    tokio::select! {
                        _ = sleep(self.idle_sleep) => {},
                        _ = shutdown.wait() => {
                            info!(queue = %self.queue, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(queue = %self.queue, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(queue = %self.queue, "Worker stopped");
        Ok(())
    }

    /// Process next record from the queue (returns true if one was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let mut job = match self.broker.claim_next(&self.queue, now).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        info!(
            queue = %self.queue,
            job_id = %job.id,
            attempt = job.attempts_made + 1,
            "Processing job"
        );

        // Panic isolation: a panicking body must not take the worker down
        let handler = Arc::clone(&self.handler);
        let payload = job.payload.clone();
        let execution_result = tokio::task::spawn(async move { handler.handle(payload).await }).await;

        let now = self.time_provider.now_millis();
        match execution_result {
            Ok(Ok(result)) => {
                job.complete(now, result)?;
                info!(queue = %self.queue, job_id = %job.id, attempts = job.attempts_made, "Job completed");
                self.broker.finish(&job).await?;
            }
            Ok(Err(JobError::InvalidPayload { reason, .. })) => {
                error!(queue = %self.queue, job_id = %job.id, error = %reason, "Job payload rejected");
                job.fail(now, reason)?;
                self.broker.finish(&job).await?;
            }
            Ok(Err(e)) => self.handle_failure(job, e.message().to_string(), now).await?,
            Err(join_err) => {
                // Task panicked or was cancelled (non-retryable)
                if join_err.is_panic() {
                    error!(queue = %self.queue, job_id = %job.id, "Job panicked");
                } else {
                    error!(queue = %self.queue, job_id = %job.id, "Job cancelled");
                }
                job.fail(now, PANIC_FAILURE_REASON)?;
                self.broker.finish(&job).await?;
            }
        }
        Ok(true)
    }

    async fn handle_failure(&self, mut job: JobRecord, reason: String, now: i64) -> Result<()> {
        let policy = RetryPolicy::from_options(&job.options);
        match policy.decide(&job.id, job.attempts_made + 1) {
            RetryDecision::Retry(delay) => {
                let delay = jittered(&job.id, delay);
                warn!(
                    queue = %self.queue,
                    job_id = %job.id,
                    attempt = job.attempts_made + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Retrying job after failure"
                );
                job.schedule_retry(reason, now + delay.as_millis() as i64)?;
                self.broker.update(&job).await
            }
            RetryDecision::Failed => {
                error!(
                    queue = %self.queue,
                    job_id = %job.id,
                    attempts = job.attempts_made + 1,
                    error = %reason,
                    "Job failed after max retries"
                );
                job.fail(now, reason)?;
                self.broker.finish(&job).await
            }
        }
    }
}
