//! Wire types of the upstream streaming service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live channel as listed by the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalChannel {
    /// Channel name, used as the StreamHub username.
    pub name: String,
    /// Upstream identifier of the broadcast.
    pub external_id: String,
    /// Display name of the channel owner.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Avatar image URL.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Broadcast title.
    #[serde(default)]
    pub title: String,
    /// Category name.
    pub category: String,
    /// Viewer count reported upstream.
    #[serde(default)]
    pub viewers: u64,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// When the broadcast started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Current state of a live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDetails {
    /// Viewer count reported upstream.
    pub viewers: u64,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Envelope of the live-channel listing.
#[derive(Debug, Deserialize)]
pub(crate) struct ChannelPage {
    pub data: Vec<ExternalChannel>,
}
