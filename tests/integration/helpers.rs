//! Shared test helpers for integration tests.
//!
//! Everything runs against the in-memory store, bus and durable store, with
//! a scripted upstream service, so no Redis or PostgreSQL is needed.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use streamhub_cache::memory::{MemoryLiveStore, MemoryNotificationBus};
use streamhub_cache::{LiveStateCache, PresenceLedger};
use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::traits::{LiveStore, NotificationBus};
use streamhub_core::types::{CategoryId, StreamId, UserId};
use streamhub_database::MemoryDurableStore;
use streamhub_entity::stream::{LiveStream, StreamCategory, StreamOwner, StreamSource};
use streamhub_external::{ChannelDetails, ExternalChannel, StreamingService};
use streamhub_worker::{PollLock, PollScheduler, RefreshRegistry, StartStream, StreamLifecycle};

/// Upstream service driven by the test.
#[derive(Debug, Default)]
pub struct FakeStreamingService {
    live: Mutex<Vec<ExternalChannel>>,
    details: Mutex<HashMap<String, ChannelDetails>>,
    list_delay: Mutex<Duration>,
    unavailable: Mutex<bool>,
    list_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl FakeStreamingService {
    /// Replace the live-channel listing.
    pub fn set_live(&self, channels: Vec<ExternalChannel>) {
        *self.live.lock().unwrap() = channels;
    }

    /// Set what "get details" reports for a channel.
    pub fn set_details(&self, name: &str, viewers: u64, thumbnail: Option<&str>) {
        self.details.lock().unwrap().insert(
            name.to_string(),
            ChannelDetails {
                viewers,
                thumbnail: thumbnail.map(str::to_string),
            },
        );
    }

    /// Report a channel as offline.
    pub fn set_offline(&self, name: &str) {
        self.details.lock().unwrap().remove(name);
    }

    /// Delay every listing call.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Fail every listing call.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    /// Number of listing calls made so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of "get details" calls made so far.
    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingService for FakeStreamingService {
    async fn list_live_channels(&self, offset: u32, limit: u32) -> AppResult<Vec<ExternalChannel>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.unavailable.lock().unwrap() {
            return Err(AppError::external_service("upstream unavailable"));
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

    async fn get_channel(&self, name: &str) -> AppResult<Option<ChannelDetails>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.lock().unwrap().get(name).cloned())
    }
}

/// Registry that only records registrations.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    tasks: Mutex<BTreeMap<StreamId, String>>,
    registrations: AtomicUsize,
}

impl RecordingRegistry {
    /// Total number of register calls.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshRegistry for RecordingRegistry {
    async fn register(&self, id: StreamId, channel: &str) -> AppResult<bool> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
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

/// One simulated deployment: shared store, bus, durable store and upstream.
pub struct TestCluster {
    pub store: Arc<dyn LiveStore>,
    pub bus: Arc<dyn NotificationBus>,
    pub durable: Arc<MemoryDurableStore>,
    pub service: Arc<FakeStreamingService>,
    pub cache: LiveStateCache,
    pub ledger: PresenceLedger,
    pub lifecycle: StreamLifecycle,
}

impl TestCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        let store: Arc<dyn LiveStore> = Arc::new(MemoryLiveStore::new());
        let bus: Arc<dyn NotificationBus> = Arc::new(MemoryNotificationBus::new(256));
        let durable = Arc::new(MemoryDurableStore::new());
        let cache = LiveStateCache::new(Arc::clone(&store));
        let ledger = PresenceLedger::new(Arc::clone(&store), Duration::from_secs(60));
        let lifecycle = StreamLifecycle::new(cache.clone(), durable.clone());
        Self {
            store,
            bus,
            durable,
            service: Arc::new(FakeStreamingService::default()),
            cache,
            ledger,
            lifecycle,
        }
    }

    /// A poll scheduler of one instance.
    pub fn scheduler(&self, instance: &str, tasks: Arc<dyn RefreshRegistry>) -> PollScheduler {
        PollScheduler::new(
            PollLock::new(Arc::clone(&self.store), instance, Duration::from_secs(30)),
            self.service.clone(),
            self.lifecycle.clone(),
            tasks,
            50,
            50,
        )
    }

    /// Start a stream on the platform itself.
    pub async fn start_native(&self, username: &str, category: &str) -> LiveStream {
        self.lifecycle
            .start(StartStream {
                username: username.to_string(),
                display_name: None,
                avatar: None,
                title: format!("{username} is live"),
                category: category.to_string(),
                thumbnail: None,
                source: StreamSource::Native,
                external_id: None,
                started_at: Utc::now(),
            })
            .await
            .unwrap()
    }
}

/// A channel as listed upstream.
pub fn channel(name: &str, category: &str, viewers: u64) -> ExternalChannel {
    ExternalChannel {
        name: name.to_string(),
        external_id: format!("ext-{name}"),
        display_name: Some(name.to_uppercase()),
        avatar: None,
        title: format!("{name} playing {category}"),
        category: category.to_string(),
        viewers,
        thumbnail: None,
        started_at: Some(Utc::now()),
    }
}

/// A category reference.
pub fn category(id: i64, name: &str) -> StreamCategory {
    StreamCategory {
        id: CategoryId(id),
        name: name.to_string(),
        slug: name.to_lowercase().replace(' ', "-"),
    }
}

/// A live stream record built directly, bypassing the durable store.
pub fn stream(id: i64, username: &str, category: StreamCategory) -> LiveStream {
    LiveStream {
        id: StreamId(id),
        title: format!("{username} live"),
        thumbnail: None,
        viewers: 0,
        polled_viewers: 0,
        started_at: Utc::now(),
        owner: StreamOwner {
            id: UserId(id),
            username: username.to_string(),
            display_name: username.to_string(),
            avatar: None,
        },
        category,
        source: StreamSource::Native,
        external_id: None,
    }
}
