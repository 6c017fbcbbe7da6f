// Application Layer - Use Cases and Business Logic

pub mod backend;
pub mod jobs;
pub mod lifecycle;
pub mod readiness;
pub mod recovery;
pub mod retry;
pub mod runtime;
pub mod stats;
pub mod worker;

// Re-exports
pub use backend::{BackendStrategy, BrokerBackend, ExecutionMode, InlineBackend, JobBinding};
pub use jobs::{IsdocJobs, JobQueue, NotificationJobs, OcrJobs, PdfJobs, PohodaJobs};
pub use lifecycle::{wait_for_signal, Lifecycle, LifecycleState};
pub use readiness::{await_ready, ReadinessGate};
pub use retry::{RetryDecision, RetryPolicy};
pub use runtime::{Collaborators, JobRuntime};
pub use stats::{CollectReport, StatsAggregator, StatsDescriptor, StatsSource};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
