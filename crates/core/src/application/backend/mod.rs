// Backend Strategy
//
// One interface, two implementations, selected once at startup:
// - BrokerBackend: records in a broker, worker loops, completion events
// - InlineBackend: the job body runs in the caller's task with a local
//   retry loop
// Facades hold an `Arc<dyn BackendStrategy>` and never branch on the mode.

pub mod broker;
pub mod inline;

pub use broker::BrokerBackend;
pub use inline::InlineBackend;

use crate::application::retry::RetryPolicy;
use crate::domain::{JobDomain, JobError, JobId, QueueStats};
use crate::error::Result;
use crate::port::JobHandler;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Broker,
    Inline,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Broker => "broker",
            ExecutionMode::Inline => "inline",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a facade hands to the backend: domain, policy and job body
pub struct JobBinding {
    pub domain: JobDomain,
    pub policy: RetryPolicy,
    pub handler: Arc<dyn JobHandler>,
}

impl JobBinding {
    pub fn new(domain: JobDomain, policy: RetryPolicy, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            domain,
            policy,
            handler,
        }
    }
}

impl std::fmt::Debug for JobBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBinding")
            .field("domain", &self.domain)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BackendStrategy: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Attach a facade. Broker mode starts its worker loop here.
    fn register(&self, binding: Arc<JobBinding>) -> Result<()>;

    /// Wait until the domain's resources are usable
    async fn await_ready(&self, domain: JobDomain) -> Result<()>;

    /// Run the job and wait for its result
    async fn submit(&self, binding: &JobBinding, payload: Value) -> std::result::Result<Value, JobError>;

    /// Fire-and-forget. Broker mode returns the job id; inline mode runs
    /// the job to completion and returns `None`.
    async fn enqueue(
        &self,
        binding: &JobBinding,
        payload: Value,
    ) -> std::result::Result<Option<JobId>, JobError>;

    async fn stats(&self, domain: JobDomain) -> Result<QueueStats>;

    /// Stop workers, allowing in-flight jobs `grace` to finish
    async fn shutdown(&self, grace: Duration) -> Result<()>;
}
