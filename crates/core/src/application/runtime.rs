// Job Runtime
//
// Everything the process entry point needs after `initialize`: the
// selected backend, the five facades, the stats descriptors and the
// lifecycle. Built explicitly, never from import-time state.

use crate::application::backend::{BackendStrategy, ExecutionMode};
use crate::application::jobs::{IsdocJobs, NotificationJobs, OcrJobs, PdfJobs, PohodaJobs};
use crate::application::lifecycle::Lifecycle;
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsDescriptor;
use crate::config::JobsConfig;
use crate::domain::JobDomain;
use crate::error::{AppError, Result};
use crate::port::{
    AccountingExporter, FileStore, IsdocExporter, NotificationStore, OcrEngine, PdfRenderer,
};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;

/// External collaborators the job bodies delegate to
#[derive(Clone)]
pub struct Collaborators {
    pub files: Arc<dyn FileStore>,
    pub ocr: Arc<dyn OcrEngine>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub pohoda: Arc<dyn AccountingExporter>,
    pub isdoc: Arc<dyn IsdocExporter>,
    pub notifications: Arc<dyn NotificationStore>,
}

pub struct JobRuntime {
    backend: Arc<dyn BackendStrategy>,
    lifecycle: Lifecycle,
    shutdown_grace: Duration,
    pub ocr: OcrJobs,
    pub pdf: PdfJobs,
    pub pohoda: PohodaJobs,
    pub isdoc: IsdocJobs,
    pub notifications: NotificationJobs,
}

impl JobRuntime {
    /// Register every facade with `backend`
    ///
    /// In broker mode this starts one worker loop per queue.
    pub fn build(
        config: &JobsConfig,
        backend: Arc<dyn BackendStrategy>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let ocr = OcrJobs::new(
            Arc::clone(&backend),
            config.ocr_policy(),
            collaborators.files,
            collaborators.ocr,
        )?;
        let pdf = PdfJobs::new(
            Arc::clone(&backend),
            RetryPolicy::single_attempt(),
            collaborators.pdf,
        )?;
        let pohoda = PohodaJobs::new(
            Arc::clone(&backend),
            RetryPolicy::single_attempt(),
            collaborators.pohoda,
        )?;
        let isdoc = IsdocJobs::new(
            Arc::clone(&backend),
            RetryPolicy::single_attempt(),
            collaborators.isdoc,
        )?;
        let notifications = NotificationJobs::new(
            Arc::clone(&backend),
            NotificationJobs::default_policy(),
            collaborators.notifications,
        )?;

        Ok(Self {
            backend,
            lifecycle: Lifecycle::new(),
            shutdown_grace: config.shutdown_grace,
            ocr,
            pdf,
            pohoda,
            isdoc,
            notifications,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.backend.mode()
    }

    pub fn backend(&self) -> &Arc<dyn BackendStrategy> {
        &self.backend
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Aggregator input, named by the `queue` metric label
    pub fn stats_descriptors(&self) -> Vec<StatsDescriptor> {
        vec![
            StatsDescriptor::new(JobDomain::Ocr.metrics_name(), self.ocr.stats_source()),
            StatsDescriptor::new(JobDomain::Pdf.metrics_name(), self.pdf.stats_source()),
            StatsDescriptor::new(JobDomain::Pohoda.metrics_name(), self.pohoda.stats_source()),
            StatsDescriptor::new(JobDomain::Isdoc.metrics_name(), self.isdoc.stats_source()),
            StatsDescriptor::new(
                JobDomain::Notification.metrics_name(),
                self.notifications.stats_source(),
            ),
        ]
    }

    /// Wait for every queue's readiness gate, bounded by `timeout`
    pub async fn await_ready(&self, timeout: Duration) -> Result<()> {
        let gates = JobDomain::ALL.map(|domain| self.backend.await_ready(domain));
        match tokio::time::timeout(timeout, try_join_all(gates)).await {
            Ok(outcome) => outcome.map(|_| ()),
            Err(_) => Err(AppError::Unavailable(format!(
                "job queues not ready within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Drain workers with the configured grace period
    pub async fn shutdown(&self) -> Result<()> {
        self.lifecycle
            .drain(self.backend.as_ref(), self.shutdown_grace)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::backend::{BrokerBackend, InlineBackend};
    use crate::application::lifecycle::LifecycleState;
    use crate::domain::{JobState, OcrJobData};
    use crate::port::broker::mocks::InMemoryBroker;
    use crate::port::collaborators::mocks::{
        MockFileStore, MockNotificationStore, MockOcrEngine, MockRenderer,
    };
    use crate::port::id_provider::UuidProvider;
    use crate::port::time_provider::SystemTimeProvider;

    fn collaborators() -> Collaborators {
        let renderer = Arc::new(MockRenderer::new("file://artifacts"));
        Collaborators {
            files: Arc::new(MockFileStore::new()),
            ocr: Arc::new(MockOcrEngine::returning(Default::default())),
            pdf: renderer.clone(),
            pohoda: renderer.clone(),
            isdoc: renderer,
            notifications: Arc::new(MockNotificationStore::new()),
        }
    }

    #[tokio::test]
    async fn test_inline_runtime_reports_disabled_stats() {
        let runtime = JobRuntime::build(
            &JobsConfig::default(),
            Arc::new(InlineBackend::new()),
            collaborators(),
        )
        .unwrap();

        assert_eq!(runtime.mode(), ExecutionMode::Inline);
        runtime.await_ready(Duration::from_secs(1)).await.unwrap();
        let names: Vec<_> = runtime.stats_descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["ocr", "pdf", "pohoda", "isdoc", "notifications"]);
        for descriptor in runtime.stats_descriptors() {
            assert!(!descriptor.source.stats().await.unwrap().enabled);
        }

        runtime.shutdown().await.unwrap();
        assert_eq!(runtime.lifecycle().state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_broker_runtime_registers_every_queue() {
        let broker = Arc::new(InMemoryBroker::new());
        let backend = Arc::new(
            BrokerBackend::new(broker.clone(), Arc::new(UuidProvider), Arc::new(SystemTimeProvider))
                .with_poll_interval(Duration::from_millis(5)),
        );
        let config = JobsConfig {
            ocr_max_attempts: 1,
            ..JobsConfig::default()
        };
        let runtime = JobRuntime::build(&config, backend, collaborators()).unwrap();
        runtime.await_ready(Duration::from_secs(5)).await.unwrap();

        let err = runtime
            .ocr
            .process(&OcrJobData::new("file://invoices/missing.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with("(after 1 attempts)"));

        let stats = runtime.ocr.stats().await.unwrap();
        assert!(stats.enabled);
        assert_eq!(stats.count(JobState::Failed), 1);

        runtime.shutdown().await.unwrap();
        assert!(broker.is_closed());
    }
}
