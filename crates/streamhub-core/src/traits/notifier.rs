//! Cross-instance notification bus.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::result::AppResult;

/// Fire-and-forget publish/subscribe channel shared by all instances.
///
/// Delivery is at-most-once. Subscribers that fall behind observe
/// `RecvError::Lagged` and must reconcile from durable state.
#[async_trait]
pub trait NotificationBus: Send + Sync + std::fmt::Debug + 'static {
    /// Publish a payload on a topic.
    async fn publish(&self, topic: &str, payload: &str) -> AppResult<()>;

    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str) -> AppResult<broadcast::Receiver<String>>;
}
