//! Single-stream refresh from the upstream service.

use std::sync::Arc;

use tracing;

use streamhub_cache::{PresenceLedger, StreamTarget};
use streamhub_core::error::ErrorKind;
use streamhub_core::result::AppResult;
use streamhub_core::types::{StreamId, ViewerMergePolicy, ViewerSource};
use streamhub_external::StreamingService;

use crate::lifecycle::StreamLifecycle;

/// Result of one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The stream is still live; its effective count was written.
    Updated {
        /// Effective viewer count after merging.
        viewers: u64,
    },
    /// The channel went offline upstream and the stream was ended.
    Ended,
    /// The stream was no longer live in the cache.
    NotLive,
}

impl RefreshOutcome {
    /// Whether the task that produced this outcome should stop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Updated { .. })
    }
}

/// Refreshes one stream's viewer count and thumbnail from upstream.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    external: Arc<dyn StreamingService>,
    lifecycle: StreamLifecycle,
    ledger: PresenceLedger,
    policy: ViewerMergePolicy,
}

impl RefreshJob {
    /// Create a refresh job.
    pub fn new(
        external: Arc<dyn StreamingService>,
        lifecycle: StreamLifecycle,
        ledger: PresenceLedger,
        policy: ViewerMergePolicy,
    ) -> Self {
        Self {
            external,
            lifecycle,
            ledger,
            policy,
        }
    }

    /// Refresh stream `id`, broadcast upstream as `channel`.
    pub async fn run(&self, id: StreamId, channel: &str) -> AppResult<RefreshOutcome> {
        let cache = self.lifecycle.cache();

        let Some(details) = self.external.get_channel(channel).await? else {
            return match self.lifecycle.end(StreamTarget::Id(id)).await {
                Ok(_) => {
                    tracing::info!("Channel '{}' went offline, ended stream {}", channel, id);
                    Ok(RefreshOutcome::Ended)
                }
                Err(e) if e.is(ErrorKind::AlreadyEnded) => Ok(RefreshOutcome::NotLive),
                Err(e) => Err(e),
            };
        };

        let presence = self.ledger.presence_total(channel).await?;
        let viewers = self
            .policy
            .merge(details.viewers, presence, ViewerSource::Poll);

        match cache
            .record_polled_viewers(id, details.viewers, viewers)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is(ErrorKind::NotFound) => return Ok(RefreshOutcome::NotLive),
            Err(e) => return Err(e),
        }

        if let Some(thumbnail) = details.thumbnail.as_deref() {
            match cache.update_thumbnail(id, thumbnail).await {
                Ok(()) => {}
                Err(e) if e.is(ErrorKind::NotFound) => return Ok(RefreshOutcome::NotLive),
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self
            .lifecycle
            .durable()
            .update_stream_viewers(id, viewers)
            .await
        {
            tracing::warn!("Failed to persist viewers of stream {}: {}", id, e);
        }

        tracing::debug!(
            stream_id = %id,
            polled = details.viewers,
            presence,
            viewers,
            "Refreshed stream"
        );
        Ok(RefreshOutcome::Updated { viewers })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use streamhub_cache::LiveStateCache;
    use streamhub_cache::memory::MemoryLiveStore;
    use streamhub_core::traits::LiveStore;
    use streamhub_database::MemoryDurableStore;
    use streamhub_entity::stream::StreamSource;
    use streamhub_external::{ChannelDetails, ExternalChannel};

    use super::*;
    use crate::lifecycle::StartStream;

    #[derive(Debug, Default)]
    struct FakeService {
        channels: Mutex<HashMap<String, ChannelDetails>>,
    }

    #[async_trait]
    impl StreamingService for FakeService {
        async fn list_live_channels(&self, _: u32, _: u32) -> AppResult<Vec<ExternalChannel>> {
            Ok(Vec::new())
        }

        async fn get_channel(&self, name: &str) -> AppResult<Option<ChannelDetails>> {
            Ok(self.channels.lock().unwrap().get(name).cloned())
        }
    }

    struct Fixture {
        service: Arc<FakeService>,
        lifecycle: StreamLifecycle,
        ledger: PresenceLedger,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn LiveStore> = Arc::new(MemoryLiveStore::new());
            Self {
                service: Arc::new(FakeService::default()),
                lifecycle: StreamLifecycle::new(
                    LiveStateCache::new(store.clone()),
                    Arc::new(MemoryDurableStore::new()),
                ),
                ledger: PresenceLedger::new(store, Duration::from_secs(60)),
            }
        }

        fn job(&self, policy: ViewerMergePolicy) -> RefreshJob {
            RefreshJob::new(
                self.service.clone(),
                self.lifecycle.clone(),
                self.ledger.clone(),
                policy,
            )
        }

        async fn start(&self, name: &str) -> StreamId {
            self.lifecycle
                .start(StartStream {
                    username: name.to_string(),
                    display_name: None,
                    avatar: None,
                    title: "t".into(),
                    category: "Games".into(),
                    thumbnail: None,
                    source: StreamSource::External,
                    external_id: Some(format!("ext-{name}")),
                    started_at: Utc::now(),
                })
                .await
                .unwrap()
                .id
        }

        fn set_upstream(&self, name: &str, viewers: u64, thumbnail: Option<&str>) {
            self.service.channels.lock().unwrap().insert(
                name.to_string(),
                ChannelDetails {
                    viewers,
                    thumbnail: thumbnail.map(str::to_string),
                },
            );
        }
    }

    #[tokio::test]
    async fn test_refresh_writes_polled_count() {
        let fx = Fixture::new();
        let id = fx.start("alice").await;
        fx.set_upstream("alice", 120, Some("thumb.jpg"));

        let outcome = fx
            .job(ViewerMergePolicy::LatestSignal)
            .run(id, "alice")
            .await
            .unwrap();

        assert_eq!(outcome, RefreshOutcome::Updated { viewers: 120 });
        let stream = fx.lifecycle.cache().get(id).await.unwrap();
        assert_eq!(stream.viewers, 120);
        assert_eq!(stream.polled_viewers, 120);
        assert_eq!(stream.thumbnail.as_deref(), Some("thumb.jpg"));
    }

    #[tokio::test]
    async fn test_refresh_applies_merge_policy() {
        let fx = Fixture::new();
        let id = fx.start("alice").await;
        fx.set_upstream("alice", 10, None);
        fx.ledger.write_tally("alice", "i-1", 40, None).await.unwrap();

        let outcome = fx.job(ViewerMergePolicy::Max).run(id, "alice").await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Updated { viewers: 40 });
        assert_eq!(fx.lifecycle.cache().get(id).await.unwrap().polled_viewers, 10);
    }

    #[tokio::test]
    async fn test_offline_channel_ends_stream() {
        let fx = Fixture::new();
        let id = fx.start("alice").await;

        let job = fx.job(ViewerMergePolicy::LatestSignal);
        assert_eq!(job.run(id, "alice").await.unwrap(), RefreshOutcome::Ended);
        assert!(!fx.lifecycle.cache().is_live(id).await.unwrap());
        assert_eq!(job.run(id, "alice").await.unwrap(), RefreshOutcome::NotLive);
    }

    #[tokio::test]
    async fn test_ended_stream_is_not_live() {
        let fx = Fixture::new();
        let id = fx.start("alice").await;
        fx.lifecycle.end(StreamTarget::Id(id)).await.unwrap();
        fx.set_upstream("alice", 5, None);

        let outcome = fx
            .job(ViewerMergePolicy::LatestSignal)
            .run(id, "alice")
            .await
            .unwrap();
        assert!(outcome.is_terminal());
    }
}
