// PDF facade - queue `invoice-pdf`, job `generate`

use super::JobQueue;
use crate::application::backend::BackendStrategy;
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsSource;
use crate::domain::{InvoiceDocument, JobDomain, JobError, QueueStats};
use crate::error::Result;
use crate::port::PdfRenderer;
use std::sync::Arc;

pub struct PdfJobs {
    queue: Arc<JobQueue<InvoiceDocument, String>>,
}

impl PdfJobs {
    pub fn new(
        backend: Arc<dyn BackendStrategy>,
        policy: RetryPolicy,
        renderer: Arc<dyn PdfRenderer>,
    ) -> Result<Self> {
        let queue = JobQueue::new(JobDomain::Pdf, policy, backend, move |document: InvoiceDocument| {
            let renderer = Arc::clone(&renderer);
            async move {
                let artifact = renderer.render_pdf(&document).await?;
                Ok::<_, JobError>(artifact.location)
            }
        })?;
        Ok(Self {
            queue: Arc::new(queue),
        })
    }

    /// Render the invoice PDF, returning its storage location
    pub async fn generate(&self, document: &InvoiceDocument) -> std::result::Result<String, JobError> {
        self.queue.submit(document).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub fn stats_source(&self) -> Arc<dyn StatsSource> {
        self.queue.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::backend::InlineBackend;
    use crate::application::jobs::fixtures::invoice_document;
    use crate::port::collaborators::mocks::MockRenderer;

    #[tokio::test]
    async fn test_generate_returns_location() {
        let pdf = PdfJobs::new(
            Arc::new(InlineBackend::new()),
            RetryPolicy::single_attempt(),
            Arc::new(MockRenderer::new("file://pdf")),
        )
        .unwrap();

        let location = pdf.generate(&invoice_document("FV-2024-031")).await.unwrap();
        assert_eq!(location, "file://pdf/FV-2024-031.pdf");
    }

    #[tokio::test]
    async fn test_renderer_failure_is_terminal_after_one_attempt() {
        let renderer = Arc::new(MockRenderer::failing("chromium exited with status 1"));
        let pdf = PdfJobs::new(
            Arc::new(InlineBackend::new()),
            RetryPolicy::single_attempt(),
            renderer.clone(),
        )
        .unwrap();

        let err = pdf.generate(&invoice_document("FV-2024-032")).await.unwrap_err();
        assert_eq!(renderer.calls(), 1);
        assert!(err.to_string().starts_with("PDF job failed:"));
        assert!(err.to_string().contains("chromium exited with status 1"));
        assert!(err.to_string().ends_with("(after 1 attempts)"));
    }
}
