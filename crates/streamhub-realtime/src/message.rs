//! Inbound and outbound WebSocket message type definitions.

use serde::{Deserialize, Serialize};

/// Messages sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Start watching a channel. Must be the first message.
    Join {
        /// Channel name.
        channel: String,
    },
    /// Report a thumbnail candidate for the joined channel.
    Thumbnail {
        /// Image URL.
        url: String,
    },
}

/// Messages sent by the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Join confirmed.
    Joined {
        /// Channel name.
        channel: String,
        /// Local viewer count including this connection.
        viewers: u64,
    },
    /// The server is going away.
    Closing {
        /// Reason.
        reason: String,
    },
    /// Error message.
    Error {
        /// Error code.
        code: String,
        /// Error description.
        message: String,
    },
}

impl OutboundMessage {
    /// Build an error message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
