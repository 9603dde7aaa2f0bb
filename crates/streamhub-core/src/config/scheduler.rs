//! Poll scheduler and category aggregator configuration.

use serde::{Deserialize, Serialize};

/// Distributed poll scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether this instance takes part in polling at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between poll ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Time-to-live of the cluster-wide poll lock in seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,
    /// Seconds between refreshes of a single live stream.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// Page size used when walking the cached live-stream list on startup.
    #[serde(default = "default_restore_page_size")]
    pub restore_page_size: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
            lock_ttl_seconds: default_lock_ttl(),
            refresh_interval_seconds: default_refresh_interval(),
            restore_page_size: default_restore_page_size(),
        }
    }
}

/// Category leaderboard aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Seconds between recomputations.
    #[serde(default = "default_aggregate_interval")]
    pub interval_seconds: u64,
    /// Number of top leaderboard entries summed per category.
    #[serde(default = "default_top_n")]
    pub top_n: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_aggregate_interval(),
            top_n: default_top_n(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_lock_ttl() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_restore_page_size() -> u64 {
    100
}

fn default_aggregate_interval() -> u64 {
    60
}

fn default_top_n() -> u64 {
    100
}
