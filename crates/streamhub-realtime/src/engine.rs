//! Top-level presence engine that ties the hub and publisher together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use streamhub_cache::PresenceLedger;
use streamhub_core::config::PresenceConfig;
use streamhub_core::result::AppResult;
use streamhub_core::traits::NotificationBus;

use crate::hub::PresenceHub;
use crate::publisher::PresencePublisher;

/// Presence subsystem of one instance.
#[derive(Clone)]
pub struct PresenceEngine {
    hub: PresenceHub,
    publisher: Arc<PresencePublisher>,
    config: PresenceConfig,
    hub_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for PresenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceEngine").finish()
    }
}

impl PresenceEngine {
    /// Spawn the hub and build the publisher.
    pub fn new(
        config: PresenceConfig,
        ledger: PresenceLedger,
        bus: Arc<dyn NotificationBus>,
        instance_id: impl Into<String>,
    ) -> Self {
        let (hub, hub_task) = PresenceHub::spawn(config.command_buffer_size);
        let publisher = Arc::new(PresencePublisher::new(
            hub.clone(),
            ledger,
            bus,
            instance_id,
            Duration::from_secs(config.publish_interval_seconds.max(1)),
        ));

        info!("Presence engine initialized");

        Self {
            hub,
            publisher,
            config,
            hub_task: Arc::new(Mutex::new(Some(hub_task))),
        }
    }

    /// The presence hub.
    pub fn hub(&self) -> &PresenceHub {
        &self.hub
    }

    /// The tally publisher.
    pub fn publisher(&self) -> &Arc<PresencePublisher> {
        &self.publisher
    }

    /// Presence configuration.
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Run the tally publisher until the cancel signal is received.
    pub async fn run_publisher(&self, cancel: watch::Receiver<bool>) {
        self.publisher.run(cancel).await;
    }

    /// Close every connection, stop the hub and withdraw this instance's
    /// tallies.
    pub async fn shutdown(&self) -> AppResult<()> {
        info!("Shutting down presence engine");

        let closed = self.hub.shutdown().await?;
        if let Some(task) = self.hub_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Presence hub task failed: {}", e);
            }
        }
        let retracted = self.publisher.retract_all().await;

        info!(
            "Presence engine shut down ({} connections closed, {} tallies retracted)",
            closed, retracted
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use streamhub_cache::memory::{MemoryLiveStore, MemoryNotificationBus};
    use streamhub_core::traits::LiveStore;
    use tokio::sync::mpsc;

    use super::*;
    use crate::handle::ConnectionHandle;

    #[tokio::test]
    async fn test_shutdown_withdraws_contributions() {
        let store: Arc<dyn LiveStore> = Arc::new(MemoryLiveStore::new());
        let ledger = PresenceLedger::new(store, Duration::from_secs(60));
        let engine = PresenceEngine::new(
            PresenceConfig::default(),
            ledger.clone(),
            Arc::new(MemoryNotificationBus::new(16)),
            "i-1",
        );

        let (tx, _rx) = mpsc::channel(4);
        engine
            .hub()
            .register(Arc::new(ConnectionHandle::new("alice", tx)))
            .await
            .unwrap();
        engine.publisher().publish_once().await;
        assert_eq!(ledger.presence_total("alice").await.unwrap(), 1);

        engine.shutdown().await.unwrap();
        assert_eq!(ledger.presence_total("alice").await.unwrap(), 0);
        assert!(engine.shutdown().await.is_err());
    }
}
