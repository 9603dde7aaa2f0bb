//! Backend selection for the live-state store and notification bus.

use std::sync::Arc;

use tracing::info;

use streamhub_core::config::cache::CacheConfig;
use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::traits::{LiveStore, NotificationBus};

/// Capacity of each local fan-out channel of the notification bus.
const BUS_BUFFER_SIZE: usize = 1024;

/// The live-state store and notification bus of one backend.
///
/// The backend is selected at construction time based on configuration.
#[derive(Debug, Clone)]
pub struct LiveBackend {
    /// Shared key-value store.
    pub store: Arc<dyn LiveStore>,
    /// Cross-instance notifications.
    pub bus: Arc<dyn NotificationBus>,
}

impl LiveBackend {
    /// Connect to the configured backend.
    pub async fn connect(config: &CacheConfig) -> AppResult<Self> {
        match config.provider.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                info!("Initializing Redis live-state backend");
                let client = crate::redis::RedisClient::connect(&config.redis).await?;
                Ok(Self {
                    store: Arc::new(crate::redis::RedisLiveStore::new(client.clone())),
                    bus: Arc::new(crate::redis::RedisNotificationBus::new(
                        client,
                        BUS_BUFFER_SIZE,
                    )),
                })
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory live-state backend");
                Ok(Self::in_memory())
            }
            other => Err(AppError::configuration(format!(
                "Unknown cache provider: '{other}'. Supported: memory, redis"
            ))),
        }
    }

    /// Create an in-process backend (single node and tests).
    #[cfg(feature = "memory")]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(crate::memory::MemoryLiveStore::new()),
            bus: Arc::new(crate::memory::MemoryNotificationBus::new(BUS_BUFFER_SIZE)),
        }
    }
}
