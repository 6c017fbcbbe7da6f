// Job Engine Configuration
//
// Read once at startup, then passed by value. Malformed numbers fall back
// to their defaults with a warning; nothing here fails.

pub mod connection;

pub use connection::{BrokerConnection, RedisEndpoint};

use std::time::Duration;
use tracing::warn;

use crate::application::retry::RetryPolicy;
use crate::port::metrics::{DEFAULT_METRIC_PREFIX, DEFAULT_SERVICE_NAME};

pub const DEFAULT_OCR_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_OCR_RETRY_BACKOFF_MS: u64 = 5000;
pub const DEFAULT_KEY_PREFIX: &str = "fakturace";
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsConfig {
    pub connection: BrokerConnection,
    pub ocr_max_attempts: u32,
    pub ocr_retry_backoff: Duration,
    /// Namespace for broker keys / tables
    pub key_prefix: String,
    pub stats_interval: Duration,
    pub shutdown_grace: Duration,
    pub startup_timeout: Duration,
    /// Worker idle poll interval (SQLite broker, delayed-job promotion)
    pub poll_interval: Duration,
    pub metric_prefix: String,
    pub service_name: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            connection: BrokerConnection::Unavailable,
            ocr_max_attempts: DEFAULT_OCR_MAX_ATTEMPTS,
            ocr_retry_backoff: Duration::from_millis(DEFAULT_OCR_RETRY_BACKOFF_MS),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl JobsConfig {
    /// Read the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read from an arbitrary lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        Self {
            connection: BrokerConnection::resolve(&lookup),
            ocr_max_attempts: parse_or(&lookup, "OCR_MAX_ATTEMPTS", DEFAULT_OCR_MAX_ATTEMPTS)
                .max(1),
            ocr_retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "OCR_RETRY_BACKOFF_MS",
                DEFAULT_OCR_RETRY_BACKOFF_MS,
            )),
            key_prefix: text("QUEUE_KEY_PREFIX", defaults.key_prefix),
            stats_interval: Duration::from_secs(
                parse_or(&lookup, "QUEUE_STATS_INTERVAL_SECS", DEFAULT_STATS_INTERVAL_SECS).max(1),
            ),
            shutdown_grace: Duration::from_millis(parse_or(
                &lookup,
                "QUEUE_SHUTDOWN_GRACE_MS",
                DEFAULT_SHUTDOWN_GRACE_MS,
            )),
            startup_timeout: Duration::from_secs(parse_or(
                &lookup,
                "QUEUE_STARTUP_TIMEOUT_SECS",
                DEFAULT_STARTUP_TIMEOUT_SECS,
            )),
            poll_interval: Duration::from_millis(
                parse_or(&lookup, "QUEUE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS).max(1),
            ),
            metric_prefix: text("PROM_METRIC_PREFIX", defaults.metric_prefix),
            service_name: text("PROM_SERVICE_NAME", defaults.service_name),
        }
    }

    /// OCR policy (env-tunable)
    pub fn ocr_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.ocr_max_attempts, self.ocr_retry_backoff)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = %key, value = %raw, default = %default, "Invalid number, using default");
                default
            }
        },
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> JobsConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JobsConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg, JobsConfig::default());
        assert_eq!(cfg.ocr_policy().max_attempts(), 3);
        assert_eq!(cfg.ocr_policy().base_backoff(), Duration::from_millis(5000));
        assert_eq!(cfg.metric_prefix, "fakturace_");
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("OCR_MAX_ATTEMPTS", "5"),
            ("OCR_RETRY_BACKOFF_MS", "250"),
            ("QUEUE_KEY_PREFIX", "staging"),
            ("QUEUE_SHUTDOWN_GRACE_MS", "2000"),
            ("PROM_SERVICE_NAME", "fakturace-worker"),
        ]);
        assert_eq!(cfg.ocr_max_attempts, 5);
        assert_eq!(cfg.ocr_retry_backoff, Duration::from_millis(250));
        assert_eq!(cfg.key_prefix, "staging");
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(2));
        assert_eq!(cfg.service_name, "fakturace-worker");
    }

    #[test]
    fn test_malformed_numbers_fall_back() {
        let cfg = config(&[("OCR_MAX_ATTEMPTS", "three"), ("OCR_RETRY_BACKOFF_MS", "-1")]);
        assert_eq!(cfg.ocr_max_attempts, DEFAULT_OCR_MAX_ATTEMPTS);
        assert_eq!(cfg.ocr_retry_backoff, Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(config(&[("OCR_MAX_ATTEMPTS", "0")]).ocr_max_attempts, 1);
    }
}
