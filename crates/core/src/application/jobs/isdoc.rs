// ISDOC facade - queue `invoice-isdoc`, job `generate`
//
// Same document as the PDF/Pohoda jobs plus precomputed totals.

use super::JobQueue;
use crate::application::backend::BackendStrategy;
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsSource;
use crate::domain::{IsdocDocument, JobDomain, JobError, QueueStats};
use crate::error::Result;
use crate::port::IsdocExporter;
use std::sync::Arc;

pub struct IsdocJobs {
    queue: Arc<JobQueue<IsdocDocument, String>>,
}

impl IsdocJobs {
    pub fn new(
        backend: Arc<dyn BackendStrategy>,
        policy: RetryPolicy,
        exporter: Arc<dyn IsdocExporter>,
    ) -> Result<Self> {
        let queue = JobQueue::new(JobDomain::Isdoc, policy, backend, move |document: IsdocDocument| {
            let exporter = Arc::clone(&exporter);
            async move {
                let artifact = exporter.export_isdoc(&document).await?;
                Ok::<_, JobError>(artifact.location)
            }
        })?;
        Ok(Self {
            queue: Arc::new(queue),
        })
    }

    pub async fn generate(&self, document: &IsdocDocument) -> std::result::Result<String, JobError> {
        self.queue.submit(document).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub fn stats_source(&self) -> Arc<dyn StatsSource> {
        self.queue.clone()
    }
}
