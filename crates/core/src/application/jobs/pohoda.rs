// Pohoda XML facade - queue `invoice-pohoda`, job `generate`

use super::JobQueue;
use crate::application::backend::BackendStrategy;
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsSource;
use crate::domain::{InvoiceDocument, JobDomain, JobError, QueueStats};
use crate::error::Result;
use crate::port::AccountingExporter;
use std::sync::Arc;

pub struct PohodaJobs {
    queue: Arc<JobQueue<InvoiceDocument, String>>,
}

impl PohodaJobs {
    pub fn new(
        backend: Arc<dyn BackendStrategy>,
        policy: RetryPolicy,
        exporter: Arc<dyn AccountingExporter>,
    ) -> Result<Self> {
        let queue = JobQueue::new(JobDomain::Pohoda, policy, backend, move |document: InvoiceDocument| {
            let exporter = Arc::clone(&exporter);
            async move {
                let artifact = exporter.export_pohoda(&document).await?;
                Ok::<_, JobError>(artifact.location)
            }
        })?;
        Ok(Self {
            queue: Arc::new(queue),
        })
    }

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
    async fn test_export_returns_xml_location() {
        let pohoda = PohodaJobs::new(
            Arc::new(InlineBackend::new()),
            RetryPolicy::single_attempt(),
            Arc::new(MockRenderer::new("file://pohoda")),
        )
        .unwrap();

        let location = pohoda.generate(&invoice_document("FV-2024-040")).await.unwrap();
        assert_eq!(location, "file://pohoda/FV-2024-040.xml");
    }
}
