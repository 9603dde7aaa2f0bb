//! Key builders for every live-state entry.
//!
//! Keys are logical; the Redis backend prepends the configured prefix.

use streamhub_core::types::{CategoryId, StreamId};

// ── Live streams ───────────────────────────────────────────

/// Hash holding one live stream record.
pub fn stream(id: StreamId) -> String {
    format!("stream:{id}")
}

/// Set of all live stream ids.
pub const LIVE_STREAMS: &str = "streams:live";

/// Username → live stream id.
pub fn user_stream(username: &str) -> String {
    format!("user:{}:stream", username.to_lowercase())
}

// ── Categories ─────────────────────────────────────────────

/// Ranked set of a category's live streams, scored by viewers.
pub fn category_leaderboard(id: CategoryId) -> String {
    format!("category:{id}:leaderboard")
}

/// Hash holding a category's aggregate viewer count.
pub fn category(id: CategoryId) -> String {
    format!("category:{id}")
}

// ── Presence ───────────────────────────────────────────────

/// Hash of instance id → local viewer count for one channel.
pub fn presence_tally(channel: &str) -> String {
    format!("presence:{}:tally", channel.to_lowercase())
}

/// Latest thumbnail candidate reported by a presence connection.
pub fn presence_thumbnail(channel: &str) -> String {
    format!("presence:{}:thumbnail", channel.to_lowercase())
}

/// Set of channels whose presence tally changed since the last refresh.
pub const PRESENCE_PENDING: &str = "presence:pending";

// ── Scheduler ──────────────────────────────────────────────

/// Cluster-wide poll lock.
pub const POLL_LOCK: &str = "scheduler:poll-lock";

/// Cluster-wide claim on one stream's refresh task.
pub fn refresh_claim(id: StreamId) -> String {
    format!("refresh:task:{id}")
}

/// Notification topic naming channels that need a refresh.
pub const REFRESH_TOPIC: &str = "streams:refresh";
