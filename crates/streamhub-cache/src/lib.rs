//! # streamhub-cache
//!
//! Live-state storage for StreamHub. Two backends implement the
//! [`LiveStore`](streamhub_core::traits::LiveStore) contract:
//!
//! - **redis**: shared store for multi-instance deployments; each
//!   transaction runs as one Lua script
//! - **memory**: in-process store for single-node use and tests
//!
//! On top of the store sit the [`LiveStateCache`] (per-stream records,
//! category leaderboards, identity indexes) and the [`PresenceLedger`]
//! (per-instance viewer tallies). The backend is selected at runtime based
//! on configuration.

pub mod keys;
pub mod live;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use live::{LiveStateCache, PresenceLedger, StreamTarget};
pub use provider::LiveBackend;
