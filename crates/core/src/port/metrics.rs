// Metrics Sink Port
//
// Gauges published by the stats aggregator:
//   {prefix}queue_jobs{queue,state}
//   {prefix}queue_waiting_duration_ms{queue}

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::RwLock;
use std::time::Duration;

use crate::domain::JobState;

pub const DEFAULT_METRIC_PREFIX: &str = "fakturace_";
pub const DEFAULT_SERVICE_NAME: &str = "fakturace-backend";

pub trait MetricsSink: Send + Sync {
    /// Drop every previously published value
    fn reset(&self);

    fn set_queue_jobs(&self, queue: &str, state: JobState, value: u64);

    fn set_waiting_duration(&self, queue: &str, duration: Duration);
}

#[derive(Debug, Default)]
struct Gauges {
    jobs: BTreeMap<(String, JobState), u64>,
    waiting_ms: BTreeMap<String, u64>,
}

/// In-process gauge registry rendered in Prometheus text format
pub struct GaugeRegistry {
    prefix: String,
    service: String,
    gauges: RwLock<Gauges>,
}

impl GaugeRegistry {
    pub fn new(prefix: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            service: service.into(),
            gauges: RwLock::new(Gauges::default()),
        }
    }

    /// Current `queue_jobs` values keyed by (queue, state)
    pub fn jobs_snapshot(&self) -> BTreeMap<(String, JobState), u64> {
        self.gauges
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .clone()
    }

    /// Current `queue_waiting_duration_ms` values keyed by queue
    pub fn waiting_snapshot(&self) -> BTreeMap<String, u64> {
        self.gauges
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .waiting_ms
            .clone()
    }

    /// Prometheus text exposition
    pub fn render(&self) -> String {
        let gauges = self.gauges.read().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();

        let jobs = format!("{}queue_jobs", self.prefix);
        let _ = writeln!(out, "# HELP {jobs} Number of jobs per queue and state");
        let _ = writeln!(out, "# TYPE {jobs} gauge");
        for ((queue, state), value) in &gauges.jobs {
            let _ = writeln!(
                out,
                "{jobs}{{service=\"{}\",queue=\"{queue}\",state=\"{state}\"}} {value}",
                self.service
            );
        }

        let waiting = format!("{}queue_waiting_duration_ms", self.prefix);
        let _ = writeln!(
            out,
            "# HELP {waiting} Age of the oldest waiting job in milliseconds"
        );
        let _ = writeln!(out, "# TYPE {waiting} gauge");
        for (queue, value) in &gauges.waiting_ms {
            let _ = writeln!(
                out,
                "{waiting}{{service=\"{}\",queue=\"{queue}\"}} {value}",
                self.service
            );
        }
        out
    }
}

impl Default for GaugeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_METRIC_PREFIX, DEFAULT_SERVICE_NAME)
    }
}

impl MetricsSink for GaugeRegistry {
    fn reset(&self) {
        let mut gauges = self.gauges.write().unwrap_or_else(|e| e.into_inner());
        gauges.jobs.clear();
        gauges.waiting_ms.clear();
    }

    fn set_queue_jobs(&self, queue: &str, state: JobState, value: u64) {
        self.gauges
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .insert((queue.to_string(), state), value);
    }

    fn set_waiting_duration(&self, queue: &str, duration: Duration) {
        self.gauges
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .waiting_ms
            .insert(queue.to_string(), duration.as_millis() as u64);
    }
}
