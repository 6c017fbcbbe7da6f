// Drain signal shared by queue workers and the stats loop
//
// One sender per backend; every worker loop and the stats aggregator hold
// a token. Once raised the signal stays raised.

use tokio::sync::watch;

/// Tells a queue worker to stop claiming new records
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once draining starts (immediately if it already has, or if
    /// the sender is gone)
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|draining| *draining).await;
    }
}

/// Raised by the backend when the lifecycle enters Draining
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
