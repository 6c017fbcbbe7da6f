// Job Facades
//
// `JobQueue<P, R>` is the typed wrapper every domain facade builds on:
// it serializes the payload, hands it to the backend and deserializes the
// result. The domain modules only supply a job body and a policy.

pub mod isdoc;
pub mod notification;
pub mod ocr;
pub mod pdf;
pub mod pohoda;

pub use isdoc::IsdocJobs;
pub use notification::NotificationJobs;
pub use ocr::OcrJobs;
pub use pdf::PdfJobs;
pub use pohoda::PohodaJobs;

use crate::application::backend::{BackendStrategy, JobBinding};
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsSource;
use crate::domain::{JobDomain, JobError, JobId, QueueStats};
use crate::error::Result;
use crate::port::handler_fn;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct JobQueue<P, R> {
    binding: Arc<JobBinding>,
    backend: Arc<dyn BackendStrategy>,
    _types: PhantomData<fn(P) -> R>,
}

impl<P, R> JobQueue<P, R>
where
    P: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    /// Bind `body` to `domain` and register it with the backend
    pub fn new<F, Fut>(
        domain: JobDomain,
        policy: RetryPolicy,
        backend: Arc<dyn BackendStrategy>,
        body: F,
    ) -> Result<Self>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, JobError>> + Send + 'static,
    {
        let label = domain.label();
        let body = Arc::new(body);
        let handler = handler_fn(move |payload: serde_json::Value| {
            let body = Arc::clone(&body);
            async move {
                let input: P = serde_json::from_value(payload)
                    .map_err(|e| JobError::invalid_payload(label, e.to_string()))?;
                let output = (*body)(input).await?;
                serde_json::to_value(output).map_err(|e| JobError::invalid_payload(label, e.to_string()))
            }
        });

        let binding = Arc::new(JobBinding::new(domain, policy, handler));
        backend.register(Arc::clone(&binding))?;
        Ok(Self {
            binding,
            backend,
            _types: PhantomData,
        })
    }

    pub fn domain(&self) -> JobDomain {
        self.binding.domain
    }

    pub fn policy(&self) -> RetryPolicy {
        self.binding.policy
    }

    /// Run the job and wait for its result
    pub async fn submit(&self, payload: &P) -> std::result::Result<R, JobError> {
        let label = self.binding.domain.label();
        let value = serde_json::to_value(payload)
            .map_err(|e| JobError::invalid_payload(label, e.to_string()))?;
        let result = self.backend.submit(&self.binding, value).await?;
        serde_json::from_value(result).map_err(|e| JobError::invalid_payload(label, e.to_string()))
    }

    /// Fire-and-forget (see `BackendStrategy::enqueue`)
    pub async fn enqueue(&self, payload: &P) -> std::result::Result<Option<JobId>, JobError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| JobError::invalid_payload(self.binding.domain.label(), e.to_string()))?;
        self.backend.enqueue(&self.binding, value).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.backend.stats(self.binding.domain).await
    }
}

#[async_trait]
impl<P, R> StatsSource for JobQueue<P, R>
where
    P: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    async fn stats(&self) -> Result<QueueStats> {
        self.backend.stats(self.binding.domain).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::{Invoice, InvoiceDocument, Organization, WorkRecord};
    use chrono::NaiveDate;

    pub fn invoice_document(number: &str) -> InvoiceDocument {
        let issued = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        InvoiceDocument {
            invoice: Invoice {
                id: 7,
                invoice_number: number.to_string(),
                organization_id: 3,
                month: 3,
                year: 2024,
                issue_date: issued,
                due_date: issued + chrono::Duration::days(14),
                status: None,
            },
            organization: Organization {
                id: 3,
                name: "Servis Novák s.r.o.".to_string(),
                ico: Some("12345678".to_string()),
                dic: None,
                address: None,
                email: None,
                hourly_rate_minor: 65_000,
                km_rate_minor: 1_200,
            },
            work_records: vec![WorkRecord {
                id: 1,
                date: issued,
                description: Some("Server maintenance".to_string()),
                minutes: 90,
                kilometers: 12,
            }],
            services: Vec::new(),
            hardware: Vec::new(),
        }
    }
}
