// Command-backed renderers / exporters
//
// The command reads the document JSON on stdin and answers with
// `{"location": "..."}` once the artifact is stored.

use crate::command::CommandRunner;
use async_trait::async_trait;
use fakturace_core::domain::{InvoiceDocument, IsdocDocument, StoredArtifact};
use fakturace_core::error::{AppError, Result};
use fakturace_core::port::{AccountingExporter, IsdocExporter, PdfRenderer};
use tracing::info;

pub struct CommandRenderer {
    runner: CommandRunner,
}

impl CommandRenderer {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn render<D: serde::Serialize + Sync>(
        &self,
        kind: &'static str,
        invoice_number: &str,
        document: &D,
    ) -> Result<StoredArtifact> {
        let artifact: StoredArtifact = self
            .runner
            .run_json(document, &[("FAKTURACE_ARTIFACT_KIND", kind.to_string())])
            .await?;
        if artifact.location.trim().is_empty() {
            return Err(AppError::Collaborator(format!(
                "{} returned an empty location",
                self.runner.program()
            )));
        }
        info!(kind = kind, invoice = %invoice_number, location = %artifact.location, "Artifact stored");
        Ok(artifact)
    }
}

#[async_trait]
impl PdfRenderer for CommandRenderer {
    async fn render_pdf(&self, document: &InvoiceDocument) -> Result<StoredArtifact> {
        self.render("pdf", &document.invoice.invoice_number, document)
            .await
    }
}

#[async_trait]
impl AccountingExporter for CommandRenderer {
    async fn export_pohoda(&self, document: &InvoiceDocument) -> Result<StoredArtifact> {
        self.render("pohoda", &document.invoice.invoice_number, document)
            .await
    }
}

#[async_trait]
impl IsdocExporter for CommandRenderer {
    async fn export_isdoc(&self, document: &IsdocDocument) -> Result<StoredArtifact> {
        self.render("isdoc", &document.document.invoice.invoice_number, document)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn document() -> InvoiceDocument {
        serde_json::from_value(json!({
            "invoice": {
                "id": 1,
                "invoiceNumber": "2024-007",
                "organizationId": 3,
                "month": 5,
                "year": 2024,
                "issueDate": "2024-05-31",
                "dueDate": "2024-06-14"
            },
            "organization": {"id": 3, "name": "Acme s.r.o."}
        }))
        .unwrap()
    }

    fn renderer(script: &str) -> CommandRenderer {
        CommandRenderer::new(CommandRunner::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_render_pdf_reads_location() {
        let renderer = renderer(
            "cat > /dev/null; printf '{\"location\":\"file://pdf/%s.pdf\"}' \"$FAKTURACE_ARTIFACT_KIND\"",
        );
        let artifact = renderer.render_pdf(&document()).await.unwrap();
        assert_eq!(artifact.location, "file://pdf/pdf.pdf");
    }

    #[tokio::test]
    async fn test_document_reaches_stdin() {
        // Echo the invoice number back as the location
        let renderer = renderer(
            "sed -n 's/.*\"invoiceNumber\":\"\\([^\"]*\\)\".*/{\"location\":\"\\1\"}/p'",
        );
        let artifact = renderer.export_pohoda(&document()).await.unwrap();
        assert_eq!(artifact.location, "2024-007");
    }

    #[tokio::test]
    async fn test_failure_becomes_collaborator_error() {
        let renderer = renderer("echo 'no template' >&2; exit 1");
        let err = renderer.render_pdf(&document()).await.unwrap_err();
        assert!(matches!(err, AppError::Collaborator(msg) if msg.contains("no template")));
    }

    #[tokio::test]
    async fn test_empty_location_is_rejected() {
        let renderer = renderer("cat > /dev/null; echo '{\"location\":\"\"}'");
        assert!(renderer.render_pdf(&document()).await.is_err());
    }
}
