//! Applies presence tallies published by the hubs to the live-state cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing;

use streamhub_cache::{LiveStateCache, PresenceLedger, keys};
use streamhub_core::error::ErrorKind;
use streamhub_core::result::AppResult;
use streamhub_core::traits::NotificationBus;
use streamhub_core::types::{ViewerMergePolicy, ViewerSource};

use crate::tasks::RefreshRegistry;

/// Delay before resubscribing after the bus closed a subscription.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Listens for "channel needs refresh" notifications.
#[derive(Debug, Clone)]
pub struct PresenceRefreshListener {
    bus: Arc<dyn NotificationBus>,
    cache: LiveStateCache,
    ledger: PresenceLedger,
    tasks: Arc<dyn RefreshRegistry>,
    policy: ViewerMergePolicy,
}

impl PresenceRefreshListener {
    /// Create a listener.
    pub fn new(
        bus: Arc<dyn NotificationBus>,
        cache: LiveStateCache,
        ledger: PresenceLedger,
        tasks: Arc<dyn RefreshRegistry>,
        policy: ViewerMergePolicy,
    ) -> Self {
        Self {
            bus,
            cache,
            ledger,
            tasks,
            policy,
        }
    }

    /// Run until the cancel signal is received.
    ///
    /// Pending channels are drained on every (re)subscription and whenever
    /// the subscription lags, since notifications are at-most-once.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!("Presence refresh listener started");

        loop {
            match self.bus.subscribe(keys::REFRESH_TOPIC).await {
                Ok(mut rx) => {
                    self.drain_pending().await;
                    loop {
                        tokio::select! {
                            changed = cancel.changed() => {
                                if changed.is_err() || *cancel.borrow() {
                                    tracing::info!("Presence refresh listener shutting down");
                                    return;
                                }
                            }
                            message = rx.recv() => match message {
                                Ok(channel) => {
                                    if let Err(e) = self.refresh_channel(&channel).await {
                                        tracing::warn!(
                                            channel = %channel,
                                            error = %e,
                                            "Failed to apply presence tally"
                                        );
                                    }
                                }
                                Err(RecvError::Lagged(skipped)) => {
                                    tracing::warn!("Refresh listener lagged by {} messages", skipped);
                                    self.drain_pending().await;
                                }
                                Err(RecvError::Closed) => {
                                    tracing::warn!("Refresh subscription closed, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to subscribe to refresh topic: {}", e),
            }

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    /// Refresh every channel in the pending set. Returns how many were live.
    pub async fn drain_pending(&self) -> usize {
        let channels = match self.ledger.pending_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::warn!("Failed to read pending channels: {}", e);
                return 0;
            }
        };

        let mut refreshed = 0;
        for channel in &channels {
            match self.refresh_channel(channel).await {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    channel = %channel,
                    error = %e,
                    "Failed to apply pending presence tally"
                ),
            }
        }
        if !channels.is_empty() {
            tracing::debug!("Drained {} pending channels ({} live)", channels.len(), refreshed);
        }
        refreshed
    }

    /// Apply one channel's presence tally.
    ///
    /// Returns `false` when the channel has no live stream. The pending flag
    /// is cleared in both cases.
    pub async fn refresh_channel(&self, channel: &str) -> AppResult<bool> {
        let stream = match self.cache.get_by_username(channel).await {
            Ok(stream) => stream,
            Err(e) if e.is(ErrorKind::NotFound) => {
                self.ledger.clear_pending(channel).await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let presence = self.ledger.presence_total(channel).await?;
        let viewers = self
            .policy
            .merge(stream.polled_viewers, presence, ViewerSource::Presence);

        match self.cache.update_viewers(stream.id, viewers).await {
            Ok(()) => {}
            Err(e) if e.is(ErrorKind::NotFound) => {
                self.ledger.clear_pending(channel).await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        if !stream.source.is_polled() || stream.thumbnail.is_none() {
            if let Some(thumbnail) = self.ledger.thumbnail(channel).await? {
                self.cache.update_thumbnail(stream.id, &thumbnail).await?;
            }
        }

        if stream.source.is_polled() {
            self.tasks.register(stream.id, stream.username()).await?;
        }

        self.ledger.clear_pending(channel).await?;
        tracing::debug!(
            stream_id = %stream.id,
            channel = %channel,
            presence,
            viewers,
            "Applied presence tally"
        );
        Ok(true)
    }
}
