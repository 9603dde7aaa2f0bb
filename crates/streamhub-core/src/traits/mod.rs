//! Core traits defined in `streamhub-core` and implemented by other crates.

pub mod notifier;
pub mod store;

pub use notifier::NotificationBus;
pub use store::LiveStore;
