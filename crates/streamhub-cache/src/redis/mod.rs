//! Redis live-state backend.

pub mod bus;
pub mod client;
pub mod script;
pub mod store;

pub use bus::RedisNotificationBus;
pub use client::RedisClient;
pub use store::RedisLiveStore;
