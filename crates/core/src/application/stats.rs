// Job Stats Aggregator
//
// Polls every facade's `stats()` and republishes the counts to a metrics
// sink. The sink is reset first, so a domain that stops reporting drops
// out instead of freezing at its last value.

use crate::application::worker::ShutdownToken;
use crate::domain::QueueStats;
use crate::error::Result;
use crate::port::MetricsSink;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Anything that can report queue statistics
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn stats(&self) -> Result<QueueStats>;
}

/// Named source; the name becomes the `queue` label
#[derive(Clone)]
pub struct StatsDescriptor {
    pub name: String,
    pub source: Arc<dyn StatsSource>,
}

impl StatsDescriptor {
    pub fn new(name: impl Into<String>, source: Arc<dyn StatsSource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// What one collection pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub published: Vec<String>,
    /// Disabled (inline mode) or count-less domains
    pub skipped: Vec<String>,
    /// (domain, error)
    pub failed: Vec<(String, String)>,
}

pub struct StatsAggregator {
    sink: Arc<dyn MetricsSink>,
}

impl StatsAggregator {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// One collection pass over every descriptor
    ///
    /// Sources are queried concurrently; one failing source is logged and
    /// skipped without affecting the others.
    pub async fn collect(&self, descriptors: &[StatsDescriptor]) -> CollectReport {
        self.sink.reset();

        let results = join_all(descriptors.iter().map(|descriptor| async move {
            (descriptor.name.as_str(), descriptor.source.stats().await)
        }))
        .await;

        let mut report = CollectReport::default();
        for (name, result) in results {
            match result {
                Ok(stats) if !stats.has_data() => {
                    debug!(queue = %name, "No queue data to publish");
                    report.skipped.push(name.to_string());
                }
                Ok(stats) => {
                    for (state, count) in &stats.counts {
                        self.sink.set_queue_jobs(name, *state, *count);
                    }
                    if let Some(waiting) = stats.waiting_duration {
                        self.sink.set_waiting_duration(name, waiting);
                    }
                    report.published.push(name.to_string());
                }
                Err(e) => {
                    error!(queue = %name, error = %e, "Failed to collect queue stats");
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }
        report
    }

    /// Collect every `interval` until shutdown
    pub async fn run(
        &self,
        descriptors: Vec<StatsDescriptor>,
        interval: Duration,
        mut shutdown: ShutdownToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.collect(&descriptors).await;
                    debug!(
                        published = report.published.len(),
                        skipped = report.skipped.len(),
                        failed = report.failed.len(),
                        "Queue stats collected"
                    );
                }
                _ = shutdown.wait() => break,
            }
        }
        debug!("Stats aggregator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::JobState;
    use crate::error::AppError;
    use crate::port::GaugeRegistry;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource(QueueStats);

    #[async_trait]
    impl StatsSource for FixedSource {
        async fn stats(&self) -> Result<QueueStats> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl StatsSource for FailingSource {
        async fn stats(&self) -> Result<QueueStats> {
            Err(AppError::Broker("connection reset by peer".to_string()))
        }
    }

    struct CountingSource(AtomicUsize);

    #[async_trait]
    impl StatsSource for CountingSource {
        async fn stats(&self) -> Result<QueueStats> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(QueueStats::disabled())
        }
    }

    fn counts(queued: u64, failed: u64) -> QueueStats {
        let mut counts = BTreeMap::new();
        for state in JobState::ALL {
            counts.insert(state, 0);
        }
        counts.insert(JobState::Queued, queued);
        counts.insert(JobState::Failed, failed);
        QueueStats::enabled(counts, Some(Duration::from_millis(2500)))
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_block_others() {
        let registry = Arc::new(GaugeRegistry::default());
        let aggregator = StatsAggregator::new(registry.clone());
        let descriptors = vec![
            StatsDescriptor::new("ocr", Arc::new(FixedSource(counts(4, 1)))),
            StatsDescriptor::new("pdf", Arc::new(FailingSource)),
            StatsDescriptor::new("isdoc", Arc::new(FixedSource(counts(0, 2)))),
        ];

        let report = aggregator.collect(&descriptors).await;

        assert_eq!(report.published, vec!["ocr".to_string(), "isdoc".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "pdf");

        let jobs = registry.jobs_snapshot();
        assert_eq!(jobs[&("ocr".to_string(), JobState::Queued)], 4);
        assert_eq!(jobs[&("isdoc".to_string(), JobState::Failed)], 2);
        assert!(!jobs.keys().any(|(queue, _)| queue == "pdf"));
        assert_eq!(registry.waiting_snapshot()["ocr"], 2500);
    }

    #[tokio::test]
    async fn test_disabled_sources_are_skipped() {
        let registry = Arc::new(GaugeRegistry::default());
        let aggregator = StatsAggregator::new(registry.clone());
        let descriptors = vec![StatsDescriptor::new(
            "notifications",
            Arc::new(FixedSource(QueueStats::disabled())),
        )];

        let report = aggregator.collect(&descriptors).await;
        assert_eq!(report.skipped, vec!["notifications".to_string()]);
        assert!(registry.jobs_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_collect_resets_previous_values() {
        let registry = Arc::new(GaugeRegistry::default());
        registry.set_queue_jobs("pohoda", JobState::Active, 9);
        let aggregator = StatsAggregator::new(registry.clone());

        aggregator.collect(&[]).await;
        assert!(registry.jobs_snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let aggregator = Arc::new(StatsAggregator::new(Arc::new(GaugeRegistry::default())));
        let (tx, token) = shutdown_channel();

        let runner = {
            let aggregator = Arc::clone(&aggregator);
            let descriptors = vec![StatsDescriptor::new("ocr", source.clone())];
            tokio::spawn(async move {
                aggregator.run(descriptors, Duration::from_secs(15), token).await;
            })
        };

        tokio::time::sleep(Duration::from_secs(31)).await;
        tx.shutdown();
        runner.await.unwrap();

        // Ticks at 0s, 15s and 30s
        assert_eq!(source.0.load(Ordering::SeqCst), 3);
    }
}
