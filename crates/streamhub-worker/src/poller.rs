//! Distributed poll scheduler.
//!
//! Each tick one instance, whichever wins the poll lock, pages through the
//! upstream live-channel list, brings every reported channel live, ensures
//! each has a refresh task and ends polled streams that were not reported.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing;

use streamhub_cache::StreamTarget;
use streamhub_core::error::ErrorKind;
use streamhub_core::result::AppResult;
use streamhub_entity::stream::LiveStream;
use streamhub_external::{ExternalChannel, StreamingService};

use crate::lifecycle::{StartStream, StreamLifecycle};
use crate::lock::PollLock;
use crate::runner::sleep_or_cancel;
use crate::tasks::RefreshRegistry;

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Channels reported upstream.
    pub seen: usize,
    /// Streams brought live by this pass.
    pub created: usize,
    /// Polled streams ended because upstream no longer reported them.
    pub ended: usize,
    /// Channels whose reconciliation failed.
    pub failed: usize,
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another instance holds the poll lock.
    Skipped,
    /// This instance reconciled.
    Completed(PollSummary),
}

/// Reconciles the live-stream set against the upstream service.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    lock: PollLock,
    external: Arc<dyn StreamingService>,
    lifecycle: StreamLifecycle,
    tasks: Arc<dyn RefreshRegistry>,
    page_size: u32,
    restore_page_size: usize,
}

impl PollScheduler {
    /// Create a scheduler.
    pub fn new(
        lock: PollLock,
        external: Arc<dyn StreamingService>,
        lifecycle: StreamLifecycle,
        tasks: Arc<dyn RefreshRegistry>,
        page_size: u32,
        restore_page_size: usize,
    ) -> Self {
        Self {
            lock,
            external,
            lifecycle,
            tasks,
            page_size: page_size.max(1),
            restore_page_size: restore_page_size.max(1),
        }
    }

    /// Run one tick.
    ///
    /// Returns `Skipped` when the lock is held elsewhere. An upstream error
    /// aborts the pass; the lock is released either way.
    pub async fn tick(&self) -> AppResult<PollOutcome> {
        let Some(token) = self.lock.try_acquire().await? else {
            tracing::debug!("Poll lock held by another instance, skipping tick");
            return Ok(PollOutcome::Skipped);
        };

        let result = self.reconcile().await;

        match self.lock.release(&token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Poll lock expired before the pass finished"),
            Err(e) => tracing::warn!("Failed to release poll lock: {}", e),
        }

        let summary = result?;
        tracing::info!(
            seen = summary.seen,
            created = summary.created,
            ended = summary.ended,
            failed = summary.failed,
            "Poll pass completed"
        );
        Ok(PollOutcome::Completed(summary))
    }

    /// Tick every `interval` until cancelled.
    ///
    /// Cancellation is observed between ticks, so a pass in flight always
    /// completes and releases the lock.
    pub async fn run(&self, interval: Duration, mut cancel: watch::Receiver<bool>) {
        while !*cancel.borrow() {
            if let Err(e) = self.tick().await {
                tracing::warn!("Poll tick failed, retrying next tick: {}", e);
            }
            if !sleep_or_cancel(&mut cancel, interval).await {
                break;
            }
        }
        tracing::info!("Poll loop stopped");
    }

    async fn reconcile(&self) -> AppResult<PollSummary> {
        let mut summary = PollSummary::default();
        let mut seen = HashSet::new();
        let mut offset = 0u32;

        loop {
            let page = self
                .external
                .list_live_channels(offset, self.page_size)
                .await
                .map_err(|e| {
                    tracing::error!("Upstream listing failed at offset {}: {}", offset, e);
                    e
                })?;
            let len = page.len();

            for channel in &page {
                summary.seen += 1;
                seen.insert(channel.name.to_lowercase());
                match self.reconcile_channel(channel).await {
                    Ok(true) => summary.created += 1,
                    Ok(false) => {}
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(
                            channel = %channel.name,
                            error = %e,
                            "Failed to reconcile channel"
                        );
                    }
                }
            }

            if len < self.page_size as usize {
                break;
            }
            offset = offset.saturating_add(self.page_size);
        }

        summary.ended = self.reap_absent(&seen).await?;
        Ok(summary)
    }

    /// Bring one channel live and make sure it has a refresh task.
    ///
    /// Returns `true` when the stream was created by this call.
    async fn reconcile_channel(&self, channel: &ExternalChannel) -> AppResult<bool> {
        let (stream, created) = match self
            .lifecycle
            .start(StartStream::from_external(channel))
            .await
        {
            Ok(stream) => (stream, true),
            Err(e) if e.is(ErrorKind::AlreadyLive) => {
                let live = self.lifecycle.cache().get_by_username(&channel.name).await?;
                (self.sync_metadata(live, channel).await?, false)
            }
            Err(e) => return Err(e),
        };

        self.tasks.register(stream.id, stream.username()).await?;
        Ok(created)
    }

    /// Carry an upstream title or category change onto a live stream.
    async fn sync_metadata(
        &self,
        stream: LiveStream,
        channel: &ExternalChannel,
    ) -> AppResult<LiveStream> {
        let title = (stream.title != channel.title).then_some(channel.title.as_str());
        let category = (!stream.category.name.eq_ignore_ascii_case(&channel.category))
            .then_some(channel.category.as_str());
        if title.is_none() && category.is_none() {
            return Ok(stream);
        }
        tracing::debug!(channel = %channel.name, "Upstream metadata changed");
        self.lifecycle.update_metadata(stream.id, title, category).await
    }

    /// End polled streams whose channel upstream did not report.
    async fn reap_absent(&self, seen: &HashSet<String>) -> AppResult<usize> {
        let live = self
            .lifecycle
            .cache()
            .live_streams(self.restore_page_size)
            .await?;

        let mut ended = 0;
        for stream in live.iter().filter(|s| is_absent(s, seen)) {
            match self.end_stream(StreamTarget::Id(stream.id)).await {
                Ok(_) => ended += 1,
                Err(e) if e.is(ErrorKind::AlreadyEnded) => {}
                Err(e) => tracing::warn!(
                    stream_id = %stream.id,
                    error = %e,
                    "Failed to end absent stream"
                ),
            }
        }
        Ok(ended)
    }

    /// Register a refresh task for every polled stream already live.
    ///
    /// Registrations that another instance already owns are declined by the
    /// registry and still count as restored.
    pub async fn restore_refresh_tasks(&self) -> AppResult<usize> {
        let live = self
            .lifecycle
            .cache()
            .live_streams(self.restore_page_size)
            .await?;

        let mut restored = 0;
        // Native streams have no upstream channel to refresh from; presence
        // alone counts them (see "Refresh tasks for native streams" in
        // DESIGN.md).
        for stream in live.iter().filter(|s| s.source.is_polled()) {
            match self.tasks.register(stream.id, stream.username()).await {
                Ok(_) => restored += 1,
                Err(e) => tracing::warn!(
                    stream_id = %stream.id,
                    error = %e,
                    "Failed to restore refresh task"
                ),
            }
        }

        tracing::info!("Restored {} refresh tasks", restored);
        Ok(restored)
    }

    /// End a stream in the cache and durable store, and cancel its task.
    pub async fn end_stream(&self, target: StreamTarget) -> AppResult<LiveStream> {
        let ended = self.lifecycle.end(target).await?;
        if let Err(e) = self.tasks.cancel(ended.id).await {
            tracing::warn!(stream_id = %ended.id, error = %e, "Failed to cancel refresh task");
        }
        Ok(ended)
    }

    /// The refresh task registry.
    pub fn tasks(&self) -> &Arc<dyn RefreshRegistry> {
        &self.tasks
    }
}

fn is_absent(stream: &LiveStream, seen: &HashSet<String>) -> bool {
    stream.source.is_polled() && !seen.contains(&stream.username().to_lowercase())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use streamhub_cache::LiveStateCache;
    use streamhub_cache::memory::MemoryLiveStore;
    use streamhub_core::error::AppError;
    use streamhub_core::traits::LiveStore;
    use streamhub_core::types::StreamId;
    use streamhub_database::MemoryDurableStore;
    use streamhub_entity::stream::StreamSource;
    use streamhub_external::ChannelDetails;

    use super::*;

    #[derive(Debug, Default)]
    struct FakeService {
        live: Mutex<Vec<ExternalChannel>>,
        unavailable: Mutex<bool>,
    }

    impl FakeService {
        fn set_live(&self, names: &[&str]) {
            *self.live.lock().unwrap() = names
                .iter()
                .map(|name| ExternalChannel {
                    name: name.to_string(),
                    external_id: format!("ext-{name}"),
                    display_name: None,
                    avatar: None,
                    title: format!("{name} live"),
                    category: "Games".into(),
                    viewers: 10,
                    thumbnail: None,
                    started_at: None,
                })
                .collect();
        }
    }

    #[async_trait]
    impl StreamingService for FakeService {
        async fn list_live_channels(&self, offset: u32, limit: u32) -> AppResult<Vec<ExternalChannel>> {
            if *self.unavailable.lock().unwrap() {
                return Err(AppError::external_service("upstream down"));
            }
            Ok(self
                .live
                .lock()
                .unwrap()
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn get_channel(&self, _: &str) -> AppResult<Option<ChannelDetails>> {
            Ok(None)
        }
    }

    #[derive(Debug, Default)]
    struct RecordingTasks {
        tasks: Mutex<BTreeMap<StreamId, String>>,
    }

    #[async_trait]
    impl RefreshRegistry for RecordingTasks {
        async fn register(&self, id: StreamId, channel: &str) -> AppResult<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            Ok(tasks.insert(id, channel.to_string()).as_deref() != Some(channel))
        }

        async fn cancel(&self, id: StreamId) -> AppResult<bool> {
            Ok(self.tasks.lock().unwrap().remove(&id).is_some())
        }

        async fn active(&self) -> Vec<StreamId> {
            self.tasks.lock().unwrap().keys().copied().collect()
        }
    }

    struct Fixture {
        service: Arc<FakeService>,
        tasks: Arc<RecordingTasks>,
        store: Arc<dyn LiveStore>,
        scheduler: PollScheduler,
    }

    fn fixture(page_size: u32) -> Fixture {
        let store: Arc<dyn LiveStore> = Arc::new(MemoryLiveStore::new());
        let service = Arc::new(FakeService::default());
        let tasks = Arc::new(RecordingTasks::default());
        let scheduler = PollScheduler::new(
            PollLock::new(store.clone(), "test", Duration::from_secs(30)),
            service.clone(),
            StreamLifecycle::new(
                LiveStateCache::new(store.clone()),
                Arc::new(MemoryDurableStore::new()),
            ),
            tasks.clone(),
            page_size,
            10,
        );
        Fixture {
            service,
            tasks,
            store,
            scheduler,
        }
    }

    fn completed(outcome: PollOutcome) -> PollSummary {
        match outcome {
            PollOutcome::Completed(summary) => summary,
            PollOutcome::Skipped => panic!("tick was skipped"),
        }
    }

    #[tokio::test]
    async fn test_tick_pages_until_short_page() {
        let fx = fixture(2);
        fx.service.set_live(&["a", "b", "c", "d", "e"]);

        let summary = completed(fx.scheduler.tick().await.unwrap());
        assert_eq!(summary.seen, 5);
        assert_eq!(summary.created, 5);
        assert_eq!(fx.tasks.active().await.len(), 5);
    }

    #[tokio::test]
    async fn test_second_tick_creates_nothing() {
        let fx = fixture(10);
        fx.service.set_live(&["a", "b"]);

        completed(fx.scheduler.tick().await.unwrap());
        let summary = completed(fx.scheduler.tick().await.unwrap());
        assert_eq!(summary.created, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(fx.tasks.active().await.len(), 2);
    }

    #[tokio::test]
    async fn test_absent_polled_stream_is_ended() {
        let fx = fixture(10);
        fx.service.set_live(&["a", "b"]);
        completed(fx.scheduler.tick().await.unwrap());

        fx.service.set_live(&["a"]);
        let summary = completed(fx.scheduler.tick().await.unwrap());
        assert_eq!(summary.ended, 1);

        let cache = LiveStateCache::new(fx.store.clone());
        assert!(cache.get_by_username("a").await.is_ok());
        assert!(cache.get_by_username("b").await.is_err());
        assert_eq!(fx.tasks.active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_native_stream_is_never_reaped() {
        let fx = fixture(10);
        let lifecycle = fx.scheduler.lifecycle.clone();
        lifecycle
            .start(StartStream {
                username: "native".into(),
                display_name: None,
                avatar: None,
                title: "t".into(),
                category: "Art".into(),
                thumbnail: None,
                source: StreamSource::Native,
                external_id: None,
                started_at: Utc::now(),
            })
            .await
            .unwrap();

        let summary = completed(fx.scheduler.tick().await.unwrap());
        assert_eq!(summary.ended, 0);
        assert!(lifecycle.cache().get_by_username("native").await.is_ok());
    }

    #[tokio::test]
    async fn test_upstream_failure_aborts_and_releases_lock() {
        let fx = fixture(10);
        *fx.service.unavailable.lock().unwrap() = true;

        let err = fx.scheduler.tick().await.unwrap_err();
        assert!(err.is(ErrorKind::ExternalService));
        assert!(fx.store.get(streamhub_cache::keys::POLL_LOCK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lock_skips_tick() {
        let fx = fixture(10);
        fx.store
            .set_if_absent(streamhub_cache::keys::POLL_LOCK, "other", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(fx.scheduler.tick().await.unwrap(), PollOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_restore_covers_only_polled_streams() {
        let fx = fixture(10);
        fx.service.set_live(&["a", "b"]);
        completed(fx.scheduler.tick().await.unwrap());
        fx.tasks.tasks.lock().unwrap().clear();

        assert_eq!(fx.scheduler.restore_refresh_tasks().await.unwrap(), 2);
        assert_eq!(fx.tasks.active().await.len(), 2);
    }
}
