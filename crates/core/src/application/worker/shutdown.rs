// Watcher Shutdown Token

use tokio::sync::watch;

/// Shutdown signal for the stall watcher loop
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown; returns false if it was already signalled
    pub fn shutdown(&self) -> bool {
        self.tx.send_if_modified(|stopped| !std::mem::replace(stopped, true))
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_is_signalled_once() {
        let (tx, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());

        assert!(tx.shutdown());
        assert!(!tx.shutdown());
        assert!(token.is_shutdown());

        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .expect("wait should return once signalled");
    }
}
