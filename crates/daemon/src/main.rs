//! Fakturace worker - runs every job queue without the HTTP server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{error, info, warn};

use fakturace_core::application::{shutdown_channel, wait_for_signal, StatsAggregator};
use fakturace_core::config::JobsConfig;
use fakturace_core::domain::{JobDomain, JobState, QueueStats};
use fakturace_core::port::GaugeRegistry;
use fakturace_daemon::{
    backend_descriptors, close_backend, initialize, logging, open_backend, open_collaborators,
    telemetry, WorkerSettings,
};

#[derive(Parser)]
#[command(name = "fakturace-worker")]
#[command(about = "Fakturace background job worker", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot every job queue and process jobs until SIGINT/SIGTERM
    Run,

    /// Print a one-shot snapshot of the queues
    Stats {
        /// Prometheus text format instead of a table
        #[arg(long)]
        prometheus: bool,
    },
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "Queue")]
    queue: &'static str,
    #[tabled(rename = "Queued")]
    queued: u64,
    #[tabled(rename = "Active")]
    active: u64,
    #[tabled(rename = "Delayed")]
    delayed: u64,
    #[tabled(rename = "Completed")]
    completed: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Oldest wait (ms)")]
    waiting_ms: String,
}

impl QueueRow {
    fn new(domain: JobDomain, stats: &QueueStats) -> Self {
        Self {
            queue: domain.queue_name(),
            queued: stats.count(JobState::Queued),
            active: stats.count(JobState::Active),
            delayed: stats.count(JobState::Delayed),
            completed: stats.count(JobState::Completed),
            failed: stats.count(JobState::Failed),
            waiting_ms: stats
                .waiting_duration
                .map(|d| d.as_millis().to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init()?;

    let outcome = match cli.command {
        Commands::Run => run().await,
        Commands::Stats { prometheus } => stats(prometheus).await,
    };

    telemetry::shutdown();
    outcome
}

async fn run() -> Result<()> {
    info!("Fakturace worker v{} starting...", fakturace_core::VERSION);

    let config = JobsConfig::from_env();
    let settings = WorkerSettings::from_env();
    let collaborators = open_collaborators(&settings).await?;
    let runtime = initialize(&config, collaborators).await?;

    runtime
        .await_ready(config.startup_timeout)
        .await
        .context("Job queues failed to start")?;
    info!(mode = %runtime.mode(), "Worker ready, waiting for jobs");

    let registry = Arc::new(GaugeRegistry::new(
        config.metric_prefix.clone(),
        config.service_name.clone(),
    ));
    let (stats_stop, stats_token) = shutdown_channel();
    let aggregator = StatsAggregator::new(registry);
    let descriptors = runtime.stats_descriptors();
    let stats_interval = config.stats_interval;
    let stats_handle = tokio::spawn(async move {
        aggregator.run(descriptors, stats_interval, stats_token).await;
    });

    match wait_for_signal().await {
        Ok(signal) => info!(signal = signal, "Shutdown signal received"),
        Err(e) => warn!(error = %e, "Signal listener failed, shutting down"),
    }

    stats_stop.shutdown();
    if let Err(e) = runtime.shutdown().await {
        error!(error = %e, "Shutdown did not complete cleanly");
    }
    let _ = stats_handle.await;

    info!("Shutdown complete.");
    Ok(())
}

async fn stats(prometheus: bool) -> Result<()> {
    let config = JobsConfig::from_env();
    let backend = open_backend(&config).await?;

    if prometheus {
        let registry = Arc::new(GaugeRegistry::new(
            config.metric_prefix.clone(),
            config.service_name.clone(),
        ));
        let report = StatsAggregator::new(registry.clone())
            .collect(&backend_descriptors(&backend))
            .await;
        for (name, reason) in &report.failed {
            warn!(queue = %name, reason = %reason, "Queue stats unavailable");
        }
        print!("{}", registry.render());
    } else {
        let mut rows = Vec::new();
        for domain in JobDomain::ALL {
            let stats = backend
                .stats(domain)
                .await
                .with_context(|| format!("Failed to read stats of {}", domain.queue_name()))?;
            if !stats.enabled {
                println!("Jobs run inline ({} mode): no queue statistics", backend.mode());
                close_backend(&backend).await?;
                return Ok(());
            }
            rows.push(QueueRow::new(domain, &stats));
        }
        println!("{}", Table::new(rows));
    }

    close_backend(&backend).await
}
