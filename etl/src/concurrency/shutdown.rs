//! Cooperative shutdown signal.
//!
//! Workers never abort in the middle of a write. They observe the signal between batches and
//! while sleeping, finish what they are doing and return.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(Arc<watch::Sender<bool>>);

impl ShutdownTx {
    /// Signals every subscribed worker to stop. Signaling more than once has no further effect.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once shutdown has been signaled.
    ///
    /// If the sending side is dropped without signaling, this never completes.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.wait_for(|shutdown| *shutdown).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a new shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(Arc::new(tx)), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn subscribers_observe_shutdown() {
        let (tx, rx) = create_shutdown_channel();
        let mut late = tx.subscribe();
        assert!(!rx.is_shutdown());

        tx.shutdown();

        assert!(rx.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), late.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_does_not_signal() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        let waited = tokio::time::timeout(Duration::from_secs(5), rx.wait_for_shutdown()).await;
        assert!(waited.is_err());
        assert!(!rx.is_shutdown());
    }
}
