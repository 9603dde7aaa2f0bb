//! Live-stream state built on a [`LiveStore`](streamhub_core::traits::LiveStore).

pub mod cache;
pub mod presence;
pub mod record;

pub use cache::{LiveStateCache, StreamTarget};
pub use presence::PresenceLedger;
