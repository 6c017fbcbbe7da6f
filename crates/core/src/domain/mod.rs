// Domain Layer - Job records, payload shapes and queue identities

pub mod error;
pub mod invoice;
pub mod job;
pub mod notification;
pub mod ocr;
pub mod queue;
pub mod stats;

// Re-exports
pub use error::{DomainError, JobError};
pub use invoice::{
    HardwareItem, Invoice, InvoiceDocument, InvoiceTotals, IsdocDocument, Organization,
    ServiceItem, StoredArtifact, WorkRecord,
};
pub use job::{JobEvent, JobId, JobOptions, JobOutcome, JobRecord, JobState};
pub use notification::{NotificationLevel, NotificationPayload, NotificationType};
pub use ocr::{OcrJobData, OcrResult};
pub use queue::{JobDomain, QueueName};
pub use stats::QueueStats;
