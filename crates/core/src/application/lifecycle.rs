// Process lifecycle: Running -> Draining -> Stopped

use crate::application::backend::BackendStrategy;
use crate::domain::DomainError;
use crate::error::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }

    fn can_transition_to(&self, to: LifecycleState) -> bool {
        matches!(
            (self, to),
            (LifecycleState::Running, LifecycleState::Draining)
                | (LifecycleState::Draining, LifecycleState::Stopped)
        )
    }
}

pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self { state }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, to: LifecycleState) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                *current = to;
                true
            } else {
                outcome = Err(DomainError::InvalidLifecycleTransition {
                    from: current.as_str().to_string(),
                    to: to.as_str().to_string(),
                }
                .into());
                false
            }
        });
        outcome
    }

    /// Stop claiming, give in-flight jobs `grace`, close the broker
    ///
    /// Facades stay callable; in inline mode there is nothing to drain.
    pub async fn drain(&self, backend: &dyn BackendStrategy, grace: Duration) -> Result<()> {
        self.transition(LifecycleState::Draining)?;
        info!(
            mode = %backend.mode(),
            grace_ms = grace.as_millis() as u64,
            "Draining job workers"
        );
        let outcome = backend.shutdown(grace).await;
        self.transition(LifecycleState::Stopped)?;
        info!("Job workers stopped");
        outcome
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on SIGINT or SIGTERM, returning the signal name
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
