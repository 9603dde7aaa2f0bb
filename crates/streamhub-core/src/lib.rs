//! # streamhub-core
//!
//! Core crate for StreamHub. Contains configuration schemas, typed
//! identifiers, pagination, the key-value store contract used by the
//! live-state cache, and the unified error system.
//!
//! This crate has **no** internal dependencies on other StreamHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
