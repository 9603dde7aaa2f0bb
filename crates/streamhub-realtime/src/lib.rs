//! # streamhub-realtime
//!
//! Live presence for StreamHub viewers:
//!
//! - A presence hub owning the channel → connection registry in a single
//!   task reached by message passing
//! - A publisher that periodically writes this instance's per-channel
//!   tallies to the shared store and announces them on the bus
//! - The WebSocket adapter that feeds connections into the hub

pub mod engine;
pub mod handle;
pub mod hub;
pub mod message;
pub mod publisher;
pub mod ws;

pub use engine::PresenceEngine;
pub use handle::{ConnectionHandle, ConnectionId};
pub use hub::{ChannelTally, PresenceHub};
pub use message::{InboundMessage, OutboundMessage};
pub use publisher::PresencePublisher;
