//! In-memory notification bus for single-node deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use streamhub_core::result::AppResult;
use streamhub_core::traits::NotificationBus;

/// In-memory pub/sub implementation.
#[derive(Debug)]
pub struct MemoryNotificationBus {
    /// Topic → broadcast sender
    topics: DashMap<String, broadcast::Sender<String>>,
    /// Buffer size for topics
    buffer_size: usize,
}

impl MemoryNotificationBus {
    /// Create a new in-memory bus
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer_size,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }
}

#[async_trait]
impl NotificationBus for MemoryNotificationBus {
    async fn publish(&self, topic: &str, payload: &str) -> AppResult<()> {
        let _ = self.sender(topic).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<broadcast::Receiver<String>> {
        Ok(self.sender(topic).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = MemoryNotificationBus::new(8);
        let mut a = bus.subscribe("streams:refresh").await.unwrap();
        let mut b = bus.subscribe("streams:refresh").await.unwrap();

        bus.publish("streams:refresh", "alice").await.unwrap();

        assert_eq!(a.recv().await.unwrap(), "alice");
        assert_eq!(b.recv().await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryNotificationBus::new(8);
        bus.publish("nobody", "x").await.unwrap();
    }
}
