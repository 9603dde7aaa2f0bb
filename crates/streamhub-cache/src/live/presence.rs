//! Per-instance presence tallies.
//!
//! Each instance owns one field (its instance id) in a channel's tally hash.
//! The channel's presence count is the sum over all fields. Every write
//! refreshes the hash TTL, so the contribution of an instance that stops
//! publishing ages out.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::Transaction;

use crate::keys;

/// Shared presence state across instances.
#[derive(Debug, Clone)]
pub struct PresenceLedger {
    store: Arc<dyn LiveStore>,
    tally_ttl: Duration,
}

impl PresenceLedger {
    /// Create a ledger whose tallies expire after `tally_ttl` without writes.
    pub fn new(store: Arc<dyn LiveStore>, tally_ttl: Duration) -> Self {
        Self { store, tally_ttl }
    }

    /// Publish this instance's viewer count for a channel and mark the
    /// channel as pending refresh.
    ///
    /// A count of zero removes the instance's contribution.
    pub async fn write_tally(
        &self,
        channel: &str,
        instance_id: &str,
        viewers: u64,
        thumbnail: Option<&str>,
    ) -> AppResult<()> {
        let tally_key = keys::presence_tally(channel);
        let mut tx = if viewers == 0 {
            Transaction::new().hash_delete(&tally_key, instance_id)
        } else {
            Transaction::new().hash_set_field(&tally_key, instance_id, viewers.to_string())
        };
        tx = tx.expire(&tally_key, self.tally_ttl);

        if let Some(thumbnail) = thumbnail {
            let thumbnail_key = keys::presence_thumbnail(channel);
            tx = tx
                .put(&thumbnail_key, thumbnail)
                .expire(&thumbnail_key, self.tally_ttl);
        }

        tx = tx.set_add(keys::PRESENCE_PENDING, channel.to_lowercase());
        self.store.commit(tx).await?;
        Ok(())
    }

    /// Sum of every instance's contribution for a channel.
    pub async fn presence_total(&self, channel: &str) -> AppResult<u64> {
        let tally = self
            .store
            .hash_get_all(&keys::presence_tally(channel))
            .await?;

        let mut total = 0u64;
        for (instance, raw) in &tally {
            match raw.parse::<u64>() {
                Ok(count) => total += count,
                Err(_) => warn!(channel, instance = %instance, value = %raw, "Ignoring malformed tally"),
            }
        }
        Ok(total)
    }

    /// Latest thumbnail candidate reported for a channel.
    pub async fn thumbnail(&self, channel: &str) -> AppResult<Option<String>> {
        self.store.get(&keys::presence_thumbnail(channel)).await
    }

    /// Channels whose tally changed since they were last refreshed.
    pub async fn pending_channels(&self) -> AppResult<Vec<String>> {
        let mut channels = self.store.set_members(keys::PRESENCE_PENDING).await?;
        channels.sort();
        Ok(channels)
    }

    /// Remove a channel from the pending set.
    pub async fn clear_pending(&self, channel: &str) -> AppResult<()> {
        let tx = Transaction::new().set_remove(keys::PRESENCE_PENDING, channel.to_lowercase());
        self.store.commit(tx).await?;
        Ok(())
    }
}
