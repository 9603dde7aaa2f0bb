//! Key-value store contract backing the live-state cache.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::transaction::{CommitOutcome, Transaction};

/// Trait for live-state backends (Redis or in-memory).
///
/// Keys are logical; the backend is responsible for namespacing. Multi-key
/// mutations go through [`LiveStore::commit`], which applies a whole
/// [`Transaction`] or nothing.
#[async_trait]
pub trait LiveStore: Send + Sync + std::fmt::Debug + 'static {
    /// Apply a guarded transaction atomically.
    async fn commit(&self, tx: Transaction) -> AppResult<CommitOutcome>;

    /// Read a string value.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Read every field of a hash. Missing keys yield an empty map.
    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>>;

    /// Read a window of a ranked set, highest score first.
    async fn ranked_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>>;

    /// Number of members in a ranked set.
    async fn ranked_len(&self, key: &str) -> AppResult<u64>;

    /// Members of a plain set.
    async fn set_members(&self, key: &str) -> AppResult<Vec<String>>;

    /// Whether `member` belongs to a plain set.
    async fn set_contains(&self, key: &str, member: &str) -> AppResult<bool>;

    /// Write `value` only if `key` is absent (NX), expiring after `ttl`.
    /// Returns `true` if the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    /// Delete `key` only if it currently holds `value`.
    /// Returns `true` if the key was deleted.
    async fn delete_if_equals(&self, key: &str, value: &str) -> AppResult<bool>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
