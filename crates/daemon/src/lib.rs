//! Fakturace job engine composition root
//!
//! Wires the configured broker (Redis, SQLite or none) and the external
//! collaborators into a [`JobRuntime`]. Used by the `fakturace-worker`
//! binary and by anything embedding the job engine.

pub mod logging;
pub mod settings;
pub mod telemetry;
mod unconfigured;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use fakturace_core::application::{
    BackendStrategy, BrokerBackend, Collaborators, InlineBackend, JobRuntime, StatsDescriptor,
    StatsSource,
};
use fakturace_core::config::{BrokerConnection, JobsConfig};
use fakturace_core::domain::{JobDomain, QueueStats};
use fakturace_core::port::id_provider::UuidProvider;
use fakturace_core::port::time_provider::SystemTimeProvider;
use fakturace_core::port::{AccountingExporter, Broker, IsdocExporter, OcrEngine, PdfRenderer};
use fakturace_infra_redis::RedisBroker;
use fakturace_infra_sqlite::{connect_broker, create_pool, run_migrations, SqliteNotificationStore};
use fakturace_infra_system::{CommandOcrEngine, CommandRenderer, CommandRunner, LocalFileStore};

pub use settings::WorkerSettings;
use unconfigured::Unconfigured;

/// Select the backend for `config.connection`
///
/// No connection means inline execution; that is a supported deployment,
/// not an error.
pub async fn open_backend(config: &JobsConfig) -> Result<Arc<dyn BackendStrategy>> {
    let broker: Arc<dyn Broker> = match &config.connection {
        BrokerConnection::Redis(endpoint) => {
            info!(endpoint = ?endpoint, "Using Redis broker");
            Arc::new(
                RedisBroker::new(&endpoint.url, config.key_prefix.clone())
                    .context("Failed to configure Redis broker")?,
            )
        }
        BrokerConnection::Sqlite { url } => {
            info!(url = %url, "Using SQLite broker");
            Arc::new(
                connect_broker(url, config.poll_interval)
                    .await
                    .context("Failed to open SQLite queue database")?,
            )
        }
        BrokerConnection::Unavailable => {
            info!("No broker configured, jobs run inline");
            return Ok(Arc::new(InlineBackend::new()));
        }
    };

    Ok(Arc::new(
        BrokerBackend::new(broker, Arc::new(UuidProvider), Arc::new(SystemTimeProvider))
            .with_poll_interval(config.poll_interval),
    ))
}

/// Build the collaborators described by `settings`
pub async fn open_collaborators(settings: &WorkerSettings) -> Result<Collaborators> {
    let pool = create_pool(&settings.database_url)
        .await
        .context("Failed to open application database")?;
    run_migrations(&pool)
        .await
        .context("Application database migration failed")?;

    let timeout = settings.command_timeout;
    let runner = |line: &Option<String>| -> Result<Option<CommandRunner>> {
        line.as_deref()
            .map(|line| CommandRunner::from_command_line(line, timeout))
            .transpose()
            .context("Invalid collaborator command")
    };

    let pdf: Arc<dyn PdfRenderer> = match runner(&settings.pdf_command)? {
        Some(runner) => Arc::new(CommandRenderer::new(runner)),
        None => Arc::new(Unconfigured::new("FAKTURACE_PDF_COMMAND")),
    };
    let pohoda: Arc<dyn AccountingExporter> =
        match runner(&settings.pohoda_command)? {
            Some(runner) => Arc::new(CommandRenderer::new(runner)),
            None => Arc::new(Unconfigured::new("FAKTURACE_POHODA_COMMAND")),
        };
    let isdoc: Arc<dyn IsdocExporter> =
        match runner(&settings.isdoc_command)? {
            Some(runner) => Arc::new(CommandRenderer::new(runner)),
            None => Arc::new(Unconfigured::new("FAKTURACE_ISDOC_COMMAND")),
        };
    let ocr: Arc<dyn OcrEngine> = match runner(&settings.ocr_command)? {
        Some(runner) => Arc::new(CommandOcrEngine::new(runner)),
        None => Arc::new(Unconfigured::new("FAKTURACE_OCR_COMMAND")),
    };

    Ok(Collaborators {
        files: Arc::new(LocalFileStore::new(settings.storage_dir.clone())),
        ocr,
        pdf,
        pohoda,
        isdoc,
        notifications: Arc::new(SqliteNotificationStore::new(
            pool,
            Arc::new(SystemTimeProvider),
        )),
    })
}

/// Build the job runtime for this process
///
/// In broker mode every queue gets its worker loop here; callers should
/// still `await_ready` before reporting the process healthy.
pub async fn initialize(config: &JobsConfig, collaborators: Collaborators) -> Result<JobRuntime> {
    let backend = open_backend(config).await?;
    let runtime = JobRuntime::build(config, backend, collaborators)
        .context("Failed to register job queues")?;
    info!(mode = %runtime.mode(), "Job runtime initialized");
    Ok(runtime)
}

/// Stats of one queue read straight from a backend
///
/// Lets `fakturace-worker stats` report without registering workers.
pub struct BackendQueueStats {
    backend: Arc<dyn BackendStrategy>,
    domain: JobDomain,
}

#[async_trait]
impl StatsSource for BackendQueueStats {
    async fn stats(&self) -> fakturace_core::error::Result<QueueStats> {
        self.backend.stats(self.domain).await
    }
}

/// Descriptors for every queue of `backend`
pub fn backend_descriptors(backend: &Arc<dyn BackendStrategy>) -> Vec<StatsDescriptor> {
    JobDomain::ALL
        .iter()
        .map(|&domain| {
            StatsDescriptor::new(
                domain.metrics_name(),
                Arc::new(BackendQueueStats {
                    backend: Arc::clone(backend),
                    domain,
                }),
            )
        })
        .collect()
}

/// Release the backend without waiting on workers
pub async fn close_backend(backend: &Arc<dyn BackendStrategy>) -> Result<()> {
    backend
        .shutdown(Duration::ZERO)
        .await
        .context("Failed to close backend")
}
