// Placeholder for a collaborator whose command is not configured
//
// Jobs routed to it fail with a message naming the missing variable
// instead of the worker refusing to start.

use async_trait::async_trait;
use fakturace_core::domain::{InvoiceDocument, IsdocDocument, OcrResult, StoredArtifact};
use fakturace_core::error::{AppError, Result};
use fakturace_core::port::{AccountingExporter, IsdocExporter, OcrEngine, OcrInput, PdfRenderer};

pub(crate) struct Unconfigured {
    variable: &'static str,
}

impl Unconfigured {
    pub(crate) fn new(variable: &'static str) -> Self {
        Self { variable }
    }

    fn error(&self) -> AppError {
        AppError::Config(format!("{} is not set", self.variable))
    }
}

#[async_trait]
impl PdfRenderer for Unconfigured {
    async fn render_pdf(&self, _document: &InvoiceDocument) -> Result<StoredArtifact> {
        Err(self.error())
    }
}

#[async_trait]
impl AccountingExporter for Unconfigured {
    async fn export_pohoda(&self, _document: &InvoiceDocument) -> Result<StoredArtifact> {
        Err(self.error())
    }
}

#[async_trait]
impl IsdocExporter for Unconfigured {
    async fn export_isdoc(&self, _document: &IsdocDocument) -> Result<StoredArtifact> {
        Err(self.error())
    }
}

#[async_trait]
impl OcrEngine for Unconfigured {
    async fn extract(&self, _input: OcrInput) -> Result<OcrResult> {
        Err(self.error())
    }
}
