//! Durable stream rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use streamhub_core::types::{CategoryId, StreamId, UserId};

use super::source::StreamSource;

/// A stream row in the relational store, live or ended.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StreamRow {
    /// Unique stream identifier.
    pub id: StreamId,
    /// Owning user.
    pub user_id: UserId,
    /// Category at the time of the last update.
    pub category_id: CategoryId,
    /// Stream title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Last viewer count pushed from the cache.
    pub viewers: i64,
    /// How the stream was discovered.
    pub source: StreamSource,
    /// Identifier on the upstream service.
    pub external_id: Option<String>,
    /// When the broadcast started.
    pub started_at: DateTime<Utc>,
    /// When the broadcast ended, `None` while live.
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamRow {
    /// Whether the row describes a stream that is still live.
    pub fn is_live(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Data required to insert a new stream row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStream {
    /// Owning user.
    pub user_id: UserId,
    /// Category.
    pub category_id: CategoryId,
    /// Stream title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// How the stream was discovered.
    pub source: StreamSource,
    /// Identifier on the upstream service.
    pub external_id: Option<String>,
    /// When the broadcast started.
    pub started_at: DateTime<Utc>,
}
