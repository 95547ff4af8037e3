use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Fans a single shutdown signal out to every long-running component.
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
        }
    }

    /// Receiver that fires once shutdown is triggered.
    ///
    /// Subscribing after shutdown yields a receiver that fires immediately.
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.shutdown_tx.read().await.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            debug!("shutdown already triggered");
            return;
        };

        debug!(subscribers = tx.receiver_count(), "sending shutdown signal");
        // No receivers is fine.
        let _ = tx.send(());
        info!("shutdown signal sent");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.read().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
