//! Periodic publication of this instance's presence tallies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use streamhub_cache::{PresenceLedger, keys};
use streamhub_core::result::AppResult;
use streamhub_core::traits::NotificationBus;

use crate::hub::PresenceHub;

/// Writes local tallies into the shared ledger and announces each channel.
#[derive(Debug)]
pub struct PresencePublisher {
    hub: PresenceHub,
    ledger: PresenceLedger,
    bus: Arc<dyn NotificationBus>,
    instance_id: String,
    interval: Duration,
    /// Channels this instance contributed to on the previous publish.
    published: Mutex<HashSet<String>>,
}

impl PresencePublisher {
    /// Create a publisher.
    pub fn new(
        hub: PresenceHub,
        ledger: PresenceLedger,
        bus: Arc<dyn NotificationBus>,
        instance_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            hub,
            ledger,
            bus,
            instance_id: instance_id.into(),
            interval,
            published: Mutex::new(HashSet::new()),
        }
    }

    /// Publish every `interval` until the cancel signal is received.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(
            "Presence publisher started (instance={}, every {}s)",
            self.instance_id,
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.publish_once().await;
                }
            }
        }
        info!("Presence publisher stopped");
    }

    /// Publish one round. Returns the number of channels written.
    ///
    /// Channels that lost their last local connection since the previous
    /// round get a zero contribution. A channel whose write failed stays
    /// in the published set so the next round retries it.
    pub async fn publish_once(&self) -> usize {
        let snapshot = self.hub.snapshot();
        let mut published = self.published.lock().await;

        let mut next = HashSet::with_capacity(snapshot.len());
        let mut written = 0;

        for tally in &snapshot {
            next.insert(tally.channel.clone());
            match self
                .publish_channel(&tally.channel, tally.viewers, tally.thumbnail.as_deref())
                .await
            {
                Ok(()) => written += 1,
                Err(e) => warn!(channel = %tally.channel, error = %e, "Failed to publish tally"),
            }
        }

        let stale: Vec<String> = published
            .iter()
            .filter(|c| !next.contains(*c))
            .cloned()
            .collect();
        for channel in stale {
            match self.publish_channel(&channel, 0, None).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Failed to retract tally");
                    next.insert(channel);
                }
            }
        }

        *published = next;
        if written > 0 {
            debug!("Published {} presence tallies", written);
        }
        written
    }

    /// Withdraw every contribution of this instance.
    pub async fn retract_all(&self) -> usize {
        let mut published = self.published.lock().await;
        let mut retracted = 0;
        for channel in published.drain() {
            match self.publish_channel(&channel, 0, None).await {
                Ok(()) => retracted += 1,
                Err(e) => warn!(channel = %channel, error = %e, "Failed to retract tally"),
            }
        }
        retracted
    }

    async fn publish_channel(
        &self,
        channel: &str,
        viewers: u64,
        thumbnail: Option<&str>,
    ) -> AppResult<()> {
        self.ledger
            .write_tally(channel, &self.instance_id, viewers, thumbnail)
            .await?;
        self.bus.publish(keys::REFRESH_TOPIC, channel).await
    }
}
