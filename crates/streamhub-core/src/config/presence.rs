//! Presence hub configuration.

use serde::{Deserialize, Serialize};

use crate::types::viewers::ViewerMergePolicy;

/// Real-time presence hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds between tally publications.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_seconds: u64,
    /// Buffer size of the hub's command queue.
    #[serde(default = "default_command_buffer")]
    pub command_buffer_size: usize,
    /// Buffer size of each connection's outbound queue.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer_size: usize,
    /// Seconds a published tally survives without being refreshed.
    #[serde(default = "default_tally_ttl")]
    pub tally_ttl_seconds: u64,
    /// Seconds to wait for a connection's first message.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            publish_interval_seconds: default_publish_interval(),
            command_buffer_size: default_command_buffer(),
            connection_buffer_size: default_connection_buffer(),
            tally_ttl_seconds: default_tally_ttl(),
            join_timeout_seconds: default_join_timeout(),
        }
    }
}

/// How the two viewer-counting pipelines are merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewersConfig {
    /// Merge policy applied at every viewer-count write.
    #[serde(default)]
    pub merge_policy: ViewerMergePolicy,
}

fn default_publish_interval() -> u64 {
    10
}

fn default_command_buffer() -> usize {
    1024
}

fn default_connection_buffer() -> usize {
    64
}

fn default_tally_ttl() -> u64 {
    60
}

fn default_join_timeout() -> u64 {
    10
}
