//! Subscriber setup for the worker binary

use crate::telemetry;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "fakturace=info";
const LOG_FILE_NAME: &str = "fakturace-worker.log";

/// Install the global subscriber
///
/// `FAKTURACE_LOG_FORMAT=json` selects JSON lines, anything else the pretty
/// format. `FAKTURACE_LOG_DIR` redirects output to a daily rotated file.
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
    let log_format = std::env::var("FAKTURACE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let log_dir = std::env::var("FAKTURACE_LOG_DIR").ok().filter(|d| !d.trim().is_empty());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let (writer, guard) = match &log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_NAME)),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(telemetry::layer())
                .with(env_filter)
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        _ => {
            // Development: pretty formatting, colors only on a terminal stream
            tracing_subscriber::registry()
                .with(telemetry::layer())
                .with(env_filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_ansi(log_dir.is_none())
                        .with_writer(writer),
                )
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
    }

    Ok(guard)
}
