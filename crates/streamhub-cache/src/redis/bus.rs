//! Redis pub/sub notification bus.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_core::traits::NotificationBus;

use super::client::{RedisClient, map_err};

/// Cross-instance notification bus on Redis PUBLISH/SUBSCRIBE.
///
/// Each topic gets one dedicated pub/sub connection whose messages are
/// fanned out to local subscribers through a broadcast channel.
#[derive(Debug, Clone)]
pub struct RedisNotificationBus {
    /// Redis client.
    client: RedisClient,
    /// Topic → local fan-out sender.
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    /// Capacity of each fan-out channel.
    buffer_size: usize,
}

impl RedisNotificationBus {
    /// Create a new bus.
    pub fn new(client: RedisClient, buffer_size: usize) -> Self {
        Self {
            client,
            topics: Arc::new(DashMap::new()),
            buffer_size,
        }
    }
}

#[async_trait]
impl NotificationBus for RedisNotificationBus {
    async fn publish(&self, topic: &str, payload: &str) -> AppResult<()> {
        let mut conn = self.client.conn_mut();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(self.client.prefixed_key(topic))
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<broadcast::Receiver<String>> {
        if let Some(tx) = self.topics.get(topic) {
            return Ok(tx.subscribe());
        }

        let channel = self.client.prefixed_key(topic);
        let mut pubsub = self.client.client().get_async_pubsub().await.map_err(|e| {
            AppError::with_source(ErrorKind::Cache, "Failed to open Redis pub/sub", e)
        })?;
        pubsub.subscribe(&channel).await.map_err(map_err)?;

        let (tx, rx) = broadcast::channel(self.buffer_size);
        self.topics.insert(topic.to_string(), tx.clone());
        info!(topic, "Subscribed to Redis topic");

        let topics = Arc::clone(&self.topics);
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        // No local subscribers is not an error.
                        let _ = tx.send(payload);
                    }
                    Err(e) => warn!(topic = %topic, error = %e, "Dropping malformed pub/sub payload"),
                }
            }
            warn!(topic = %topic, "Redis pub/sub connection closed");
            topics.remove(&topic);
        });

        Ok(rx)
    }
}
