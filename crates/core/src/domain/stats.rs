// Queue Statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::job::JobState;

/// Snapshot of one queue
///
/// `enabled == false` means the process runs inline: there is no backlog
/// and nothing to alarm on. Consumers must not read it as an error or as
/// "all counts are zero".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub enabled: bool,
    #[serde(default)]
    pub counts: BTreeMap<JobState, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_duration: Option<Duration>,
}

impl QueueStats {
    /// Inline mode report
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled(counts: BTreeMap<JobState, u64>, waiting_duration: Option<Duration>) -> Self {
        Self {
            enabled: true,
            counts,
            waiting_duration,
        }
    }

    /// Count for one state (0 when absent)
    pub fn count(&self, state: JobState) -> u64 {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    /// Whether the aggregator has anything to publish
    pub fn has_data(&self) -> bool {
        self.enabled && !self.counts.is_empty()
    }
}
