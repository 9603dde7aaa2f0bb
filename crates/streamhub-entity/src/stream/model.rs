//! Live stream model held in the live-state cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamhub_core::types::{CategoryId, StreamId, UserId};

use super::source::StreamSource;

/// Owner summary denormalized into the live record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOwner {
    /// Owner's user ID.
    pub id: UserId,
    /// Channel name.
    pub username: String,
    /// Display name.
    pub display_name: String,
    /// Avatar image URL.
    pub avatar: Option<String>,
}

/// Category summary denormalized into the live record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCategory {
    /// Category ID.
    pub id: CategoryId,
    /// Display name.
    pub name: String,
    /// URL slug.
    pub slug: String,
}

/// A stream that is currently broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStream {
    /// Durable stream identifier.
    pub id: StreamId,
    /// Stream title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Effective viewer count.
    pub viewers: u64,
    /// Last count reported by the upstream service.
    #[serde(default)]
    pub polled_viewers: u64,
    /// When the broadcast started.
    pub started_at: DateTime<Utc>,
    /// Channel owner.
    pub owner: StreamOwner,
    /// Current category.
    pub category: StreamCategory,
    /// How the stream was discovered.
    pub source: StreamSource,
    /// Identifier on the upstream service, for polled streams.
    pub external_id: Option<String>,
}

impl LiveStream {
    /// Channel name of the owner.
    pub fn username(&self) -> &str {
        &self.owner.username
    }
}
