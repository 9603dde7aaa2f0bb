//! User entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use streamhub_core::types::UserId;

/// A channel owner.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Unique channel name.
    pub username: String,
    /// Human-readable display name.
    pub display_name: Option<String>,
    /// Avatar image URL.
    pub avatar: Option<String>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Display name, falling back to the username.
    pub fn display_name_or_username(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Data required to create or refresh a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertUser {
    /// Channel name (unique key).
    pub username: String,
    /// Display name (optional).
    pub display_name: Option<String>,
    /// Avatar image URL (optional).
    pub avatar: Option<String>,
}
