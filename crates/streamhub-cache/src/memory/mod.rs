//! In-process live-state backend.

pub mod bus;
pub mod store;

pub use bus::MemoryNotificationBus;
pub use store::MemoryLiveStore;
