//! Cluster-wide poll lock.
//!
//! A single key written with set-if-absent and a short TTL. The value is a
//! token unique to one acquisition, so a holder whose TTL lapsed cannot
//! release a lock that another instance has since taken.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use streamhub_cache::keys;
use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;

/// Proof of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// The value stored under the lock key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// TTL-bounded mutual exclusion across instances.
#[derive(Debug, Clone)]
pub struct PollLock {
    store: Arc<dyn LiveStore>,
    instance_id: String,
    ttl: Duration,
}

impl PollLock {
    /// Create a lock handle for this instance.
    pub fn new(store: Arc<dyn LiveStore>, instance_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
            ttl,
        }
    }

    /// Try to take the lock. `None` means another instance holds it.
    pub async fn try_acquire(&self) -> AppResult<Option<LockToken>> {
        let token = LockToken(format!("{}:{}", self.instance_id, Uuid::new_v4().simple()));
        let acquired = self
            .store
            .set_if_absent(keys::POLL_LOCK, token.as_str(), self.ttl)
            .await?;
        Ok(acquired.then_some(token))
    }

    /// Release the lock if this token still owns it.
    pub async fn release(&self, token: &LockToken) -> AppResult<bool> {
        self.store
            .delete_if_equals(keys::POLL_LOCK, token.as_str())
            .await
    }
}
