//! # streamhub-external
//!
//! The upstream streaming service that is the source of truth for which
//! channels are live. [`StreamingService`] is the seam the poll scheduler
//! depends on; [`HttpStreamingClient`] implements it over HTTP.

pub mod client;
pub mod types;

pub use client::HttpStreamingClient;
pub use types::{ChannelDetails, ExternalChannel};

use async_trait::async_trait;

use streamhub_core::result::AppResult;

/// Upstream streaming service.
#[async_trait]
pub trait StreamingService: Send + Sync + std::fmt::Debug + 'static {
    /// One page of currently live channels.
    async fn list_live_channels(&self, offset: u32, limit: u32) -> AppResult<Vec<ExternalChannel>>;

    /// Current state of one channel, `None` when it is offline.
    async fn get_channel(&self, name: &str) -> AppResult<Option<ChannelDetails>>;
}
