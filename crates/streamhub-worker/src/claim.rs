//! Cluster-wide ownership of per-stream refresh tasks.
//!
//! Each stream's claim is a hash whose `owner` field names one registry and
//! which expires unless that registry's task renews it. Only the owner runs
//! the stream's refresh task; everyone else declines to schedule one.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use streamhub_cache::keys;
use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::{StreamId, Transaction};

const OWNER_FIELD: &str = "owner";

/// Claims held by one refresh registry.
#[derive(Debug, Clone)]
pub struct RefreshClaims {
    store: Arc<dyn LiveStore>,
    token: String,
    ttl: Duration,
}

impl RefreshClaims {
    /// Create a claim handle for one registry of `instance_id`.
    pub fn new(store: Arc<dyn LiveStore>, instance_id: &str, ttl: Duration) -> Self {
        Self {
            store,
            token: format!("{}:{}", instance_id, Uuid::new_v4().simple()),
            ttl,
        }
    }

    /// The owner value this registry writes.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Take the claim on `id`, or extend it if already held.
    ///
    /// Returns `false` when another registry owns it.
    pub async fn acquire(&self, id: StreamId) -> AppResult<bool> {
        let key = keys::refresh_claim(id);
        let taken = self
            .store
            .commit(
                Transaction::new()
                    .require_absent(key.as_str())
                    .hash_set_field(key.as_str(), OWNER_FIELD, self.token.as_str())
                    .expire(key.as_str(), self.ttl),
            )
            .await?;
        if taken.is_applied() {
            return Ok(true);
        }
        self.renew(id).await
    }

    /// Extend the claim if this registry still owns it.
    pub async fn renew(&self, id: StreamId) -> AppResult<bool> {
        let key = keys::refresh_claim(id);
        let outcome = self
            .store
            .commit(
                Transaction::new()
                    .require_field(key.as_str(), OWNER_FIELD, self.token.as_str())
                    .expire(key.as_str(), self.ttl),
            )
            .await?;
        Ok(outcome.is_applied())
    }

    /// Drop the claim if this registry owns it.
    pub async fn release(&self, id: StreamId) -> AppResult<bool> {
        let key = keys::refresh_claim(id);
        let outcome = self
            .store
            .commit(
                Transaction::new()
                    .require_field(key.as_str(), OWNER_FIELD, self.token.as_str())
                    .delete(key.as_str()),
            )
            .await?;
        Ok(outcome.is_applied())
    }
}
