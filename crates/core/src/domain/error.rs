// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidLifecycleTransition { from: String, to: String },

    #[error("Unknown job state: {0}")]
    UnknownJobState(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Error surfaced at the job facade boundary.
///
/// Closed set: callers branch on the variant, never on message text.
/// Only `Terminal`, `Unavailable` and `InvalidPayload` cross the facade;
/// `Transient` is what a job body reports for a single failed attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// One attempt failed; the backend decides whether to retry
    #[error("{0}")]
    Transient(String),

    /// Retries exhausted
    #[error("{domain} job failed: {message} (after {attempts} attempts)")]
    Terminal {
        domain: String,
        message: String,
        attempts: u32,
    },

    /// Broker not ready, connection lost, or event stream closed
    #[error("{domain} queue unavailable: {reason}")]
    Unavailable { domain: String, reason: String },

    /// Payload or result could not cross the serialization boundary
    #[error("invalid {domain} payload: {reason}")]
    InvalidPayload { domain: String, reason: String },
}

impl JobError {
    /// Shorthand for a single failed attempt
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Transient(message.into())
    }

    /// Build the caller-visible failure after `attempts` attempts.
    ///
    /// An empty underlying message is replaced by "job failed" so the
    /// final text always says something.
    pub fn terminal(domain: impl Into<String>, message: impl Into<String>, attempts: u32) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "job failed".to_string()
        } else {
            message
        };
        JobError::Terminal {
            domain: domain.into(),
            message,
            attempts,
        }
    }

    pub fn unavailable(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        JobError::Unavailable {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_payload(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        JobError::InvalidPayload {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Attempts made before giving up (terminal failures only)
    pub fn attempts(&self) -> Option<u32> {
        match self {
            JobError::Terminal { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Underlying message without the domain/attempt decoration
    pub fn message(&self) -> &str {
        match self {
            JobError::Transient(message) => message,
            JobError::Terminal { message, .. } => message,
            JobError::Unavailable { reason, .. } => reason,
            JobError::InvalidPayload { reason, .. } => reason,
        }
    }
}

impl From<crate::error::AppError> for JobError {
    fn from(err: crate::error::AppError) -> Self {
        JobError::Transient(err.to_string())
    }
}
