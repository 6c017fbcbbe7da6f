// Job Record Domain Model (broker mode)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::{DomainError, Result};

/// Job ID (UUID v4)
pub type JobId = String;

/// Broker-side job state
///
/// The fixed set reported by queue statistics. `Delayed` holds jobs waiting
/// out a retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    /// Every state, in reporting order
    pub const ALL: [JobState; 5] = [
        JobState::Queued,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(DomainError::UnknownJobState(other.to_string())),
        }
    }
}

/// Broker-native enqueue options, derived from a facade's RetryPolicy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts including the first execution
    pub attempts: u32,
    /// Exponential backoff base delay
    pub backoff_ms: u64,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 0,
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

/// Job Record - the broker's view of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub options: JobOptions,

    pub enqueued_at: i64,  // epoch ms
    pub available_at: i64, // epoch ms, pushed forward by retry backoff
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    pub result: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
}

impl JobRecord {
    /// Create a queued record
    ///
    /// `id` and `now_millis` are injected (IdProvider / TimeProvider) so
    /// tests stay deterministic.
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            name: name.into(),
            payload,
            state: JobState::Queued,
            attempts_made: 0,
            options,
            enqueued_at: now_millis,
            available_at: now_millis,
            started_at: None,
            finished_at: None,
            result: None,
            failed_reason: None,
        }
    }

    /// Whether a worker may claim this record at `now_millis`
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        match self.state {
            JobState::Queued => true,
            JobState::Delayed => self.available_at <= now_millis,
            _ => false,
        }
    }

    /// Queued/Delayed -> Active
    pub fn activate(&mut self, now_millis: i64) -> Result<()> {
        if !matches!(self.state, JobState::Queued | JobState::Delayed) {
            return Err(self.invalid_transition(JobState::Active));
        }
        self.state = JobState::Active;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Active -> Completed
    pub fn complete(&mut self, now_millis: i64, result: serde_json::Value) -> Result<()> {
        self.ensure_active(JobState::Completed)?;
        self.attempts_made += 1;
        self.state = JobState::Completed;
        self.finished_at = Some(now_millis);
        self.result = Some(result);
        self.failed_reason = None;
        Ok(())
    }

    /// Active -> Delayed, counting the failed attempt
    pub fn schedule_retry(
        &mut self,
        reason: impl Into<String>,
        available_at: i64,
    ) -> Result<()> {
        self.ensure_active(JobState::Delayed)?;
        self.attempts_made += 1;
        self.state = JobState::Delayed;
        self.available_at = available_at;
        self.started_at = None;
        self.failed_reason = Some(reason.into());
        Ok(())
    }

    /// Active -> Failed, counting the failed attempt
    pub fn fail(&mut self, now_millis: i64, reason: impl Into<String>) -> Result<()> {
        self.ensure_active(JobState::Failed)?;
        self.attempts_made += 1;
        self.state = JobState::Failed;
        self.finished_at = Some(now_millis);
        self.failed_reason = Some(reason.into());
        Ok(())
    }

    /// Active -> Queued without counting an attempt (stalled job recovery)
    pub fn requeue(&mut self, now_millis: i64) -> Result<()> {
        self.ensure_active(JobState::Queued)?;
        self.state = JobState::Queued;
        self.started_at = None;
        self.available_at = now_millis;
        Ok(())
    }

    fn ensure_active(&self, to: JobState) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.invalid_transition(to));
        }
        Ok(())
    }

    fn invalid_transition(&self, to: JobState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

/// Terminal outcome published on a queue's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed {
        result: serde_json::Value,
    },
    Failed {
        reason: String,
        attempts_made: u32,
    },
}

/// Event stream message, tied to one job's identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue: String,
    pub outcome: JobOutcome,
}

impl JobEvent {
    /// Event for a record in a terminal state, `None` otherwise
    pub fn from_record(record: &JobRecord) -> Option<Self> {
        let outcome = match record.state {
            JobState::Completed => JobOutcome::Completed {
                result: record.result.clone().unwrap_or(serde_json::Value::Null),
            },
            JobState::Failed => JobOutcome::Failed {
                reason: record.failed_reason.clone().unwrap_or_default(),
                attempts_made: record.attempts_made,
            },
            _ => return None,
        };
        Some(Self {
            job_id: record.id.clone(),
            queue: record.queue.clone(),
            outcome,
        })
    }
}
