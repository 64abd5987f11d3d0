use std::sync::Arc;

use tokio::sync::watch;

use crate::bridge::Bridge;
use crate::broker::BrokerPool;
use crate::config::RelayConfig;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub config: Arc<RelayConfig>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(pool: BrokerPool, config: RelayConfig) -> Self {
        let bridge = Bridge::new(pool, config.broker.topic.clone());
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            bridge,
            config: Arc::new(config),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// A receiver that flips to `true` once shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// End live sessions and refuse new broker checkouts.  Idempotent.
    pub fn begin_shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            self.bridge.pool().close();
        }
    }
}
