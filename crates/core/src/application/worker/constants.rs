// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration when no jobs are claimable (overridden by QUEUE_POLL_INTERVAL_MS)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default recovery window for stalled jobs (5 minutes)
pub const DEFAULT_RECOVERY_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Failure reason recorded when a job body panics
pub const PANIC_FAILURE_REASON: &str = "job handler panicked";
