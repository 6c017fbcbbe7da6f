// External Collaborator Ports
//
// Document rendering, OCR recognition, file storage and notification
// persistence live outside this crate. Job bodies only call these traits.

use crate::domain::{InvoiceDocument, IsdocDocument, NotificationPayload, OcrResult, StoredArtifact};
use crate::error::Result;
use async_trait::async_trait;

/// Read access to uploaded files
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Load the bytes stored at `location`, `None` when nothing is there
    async fn read(&self, location: &str) -> Result<Option<Vec<u8>>>;
}

/// Input handed to the OCR engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrInput {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(&self, input: OcrInput) -> Result<OcrResult>;
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render_pdf(&self, document: &InvoiceDocument) -> Result<StoredArtifact>;
}

/// Pohoda XML export
#[async_trait]
pub trait AccountingExporter: Send + Sync {
    async fn export_pohoda(&self, document: &InvoiceDocument) -> Result<StoredArtifact>;
}

#[async_trait]
pub trait IsdocExporter: Send + Sync {
    async fn export_isdoc(&self, document: &IsdocDocument) -> Result<StoredArtifact>;
}

/// Shared notification persistence (one instance per process)
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a notification, returning its row id
    async fn create(&self, payload: &NotificationPayload) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// File store backed by a map of location -> bytes
    #[derive(Default)]
    pub struct MockFileStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
        reads: AtomicUsize,
    }

    impl MockFileStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_file(self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
            self.files
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(location.into(), bytes.into());
            self
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileStore for MockFileStore {
        async fn read(&self, location: &str) -> Result<Option<Vec<u8>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
            Ok(files.get(location).cloned())
        }
    }

    /// OCR engine returning a fixed result
    pub struct MockOcrEngine {
        result: OcrResult,
        calls: AtomicUsize,
    }

    impl MockOcrEngine {
        pub fn returning(result: OcrResult) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrEngine for MockOcrEngine {
        async fn extract(&self, _input: OcrInput) -> Result<OcrResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    /// Renderer/exporter writing to `{prefix}/{invoice_number}.{ext}`
    pub struct MockRenderer {
        prefix: String,
        fail_with: Option<String>,
        calls: AtomicUsize,
    }

    impl MockRenderer {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                fail_with: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                prefix: String::new(),
                fail_with: Some(message.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn store(&self, invoice_number: &str, ext: &str) -> Result<StoredArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_with {
                return Err(AppError::Collaborator(message.clone()));
            }
            Ok(StoredArtifact {
                location: format!("{}/{}.{}", self.prefix, invoice_number, ext),
            })
        }
    }

    #[async_trait]
    impl PdfRenderer for MockRenderer {
        async fn render_pdf(&self, document: &InvoiceDocument) -> Result<StoredArtifact> {
            self.store(&document.invoice.invoice_number, "pdf")
        }
    }

    #[async_trait]
    impl AccountingExporter for MockRenderer {
        async fn export_pohoda(&self, document: &InvoiceDocument) -> Result<StoredArtifact> {
            self.store(&document.invoice.invoice_number, "xml")
        }
    }

    #[async_trait]
    impl IsdocExporter for MockRenderer {
        async fn export_isdoc(&self, document: &IsdocDocument) -> Result<StoredArtifact> {
            self.store(&document.document.invoice.invoice_number, "isdoc")
        }
    }

    /// Notification store keeping rows in memory
    #[derive(Default)]
    pub struct MockNotificationStore {
        rows: Mutex<Vec<NotificationPayload>>,
        failures_left: AtomicUsize,
    }

    impl MockNotificationStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `n` writes
        pub fn failing_first(n: usize) -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(n),
            }
        }

        pub fn rows(&self) -> Vec<NotificationPayload> {
            self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl NotificationStore for MockNotificationStore {
        async fn create(&self, payload: &NotificationPayload) -> Result<i64> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AppError::Storage("database is locked".to_string()));
            }
            let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
            rows.push(payload.clone());
            Ok(rows.len() as i64)
        }
    }
}
