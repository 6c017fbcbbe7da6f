// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod collaborators;
pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod metrics;
pub mod time_provider;

// Re-exports
pub use broker::{Broker, EventReceiver};
pub use collaborators::{
    AccountingExporter, FileStore, IsdocExporter, NotificationStore, OcrEngine, OcrInput,
    PdfRenderer,
};
pub use id_provider::IdProvider;
pub use job_handler::{handler_fn, JobHandler};
pub use metrics::{GaugeRegistry, MetricsSink};
pub use time_provider::TimeProvider;
