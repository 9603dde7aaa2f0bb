//! # streamhub-database
//!
//! The durable store: the relational source of stream, category and user
//! identity. [`PgDurableStore`] is backed by PostgreSQL repositories;
//! [`MemoryDurableStore`] serves single-node runs and tests.

pub mod durable;
pub mod memory;
pub mod repositories;

pub use durable::{DurableStore, PgDurableStore};
pub use memory::MemoryDurableStore;
