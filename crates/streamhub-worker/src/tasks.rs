//! Per-stream refresh tasks on a cron scheduler.
//!
//! At most one task exists per stream id across the cluster: a registry
//! only schedules a task after taking the stream's [`RefreshClaims`] claim,
//! and each run renews it. A run that finds the claim owned elsewhere
//! retires its task. Registering an id that already has a local task for
//! the same channel is a no-op; a different channel replaces the task.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;
use uuid::Uuid;

use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::StreamId;

use crate::claim::RefreshClaims;
use crate::refresh::RefreshJob;

/// Claim TTL as a multiple of the refresh interval.
const CLAIM_TTL_INTERVALS: u32 = 3;

/// Registry of recurring refresh tasks keyed by stream id.
#[async_trait]
pub trait RefreshRegistry: Send + Sync + std::fmt::Debug + 'static {
    /// Ensure a task refreshes `id` from `channel`.
    ///
    /// Returns `true` when a task was created or replaced here, `false` when
    /// one already exists here or another instance owns the stream.
    async fn register(&self, id: StreamId, channel: &str) -> AppResult<bool>;

    /// Remove the task for `id`. Returns `true` if one existed.
    async fn cancel(&self, id: StreamId) -> AppResult<bool>;

    /// Stream ids with an active task, ascending.
    async fn active(&self) -> Vec<StreamId>;
}

#[derive(Debug, Clone)]
struct TaskEntry {
    job_id: Uuid,
    channel: String,
}

struct Inner {
    scheduler: JobScheduler,
    job: Arc<RefreshJob>,
    claims: RefreshClaims,
    interval: Duration,
    tasks: Mutex<HashMap<StreamId, TaskEntry>>,
}

impl Inner {
    /// Remove the task for `id` only if it is still `job_id`.
    async fn retire(&self, id: StreamId, job_id: Uuid) {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(&id).is_some_and(|t| t.job_id == job_id) {
            tasks.remove(&id);
            if let Err(e) = self.scheduler.remove(&job_id).await {
                tracing::warn!("Failed to remove refresh task for stream {}: {}", id, e);
            }
            self.release_claim(id).await;
            tracing::info!("Refresh task for stream {} retired", id);
        }
    }

    async fn release_claim(&self, id: StreamId) {
        if let Err(e) = self.claims.release(id).await {
            tracing::warn!("Failed to release refresh claim for stream {}: {}", id, e);
        }
    }

    /// Whether this registry may run the task for `id` now.
    async fn holds_claim(&self, id: StreamId) -> bool {
        match self.claims.renew(id).await {
            Ok(true) => true,
            // Lapsed without anyone taking over: take it back.
            Ok(false) => self.claims.acquire(id).await.unwrap_or_else(|e| {
                tracing::warn!("Failed to reclaim refresh task for stream {}: {}", id, e);
                false
            }),
            Err(e) => {
                tracing::warn!("Failed to renew refresh claim for stream {}: {}", id, e);
                false
            }
        }
    }
}

/// [`RefreshRegistry`] backed by `tokio-cron-scheduler`.
#[derive(Clone)]
pub struct CronRefreshTasks {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CronRefreshTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronRefreshTasks")
            .field("interval", &self.inner.interval)
            .finish()
    }
}

impl CronRefreshTasks {
    /// Create a registry whose tasks run `job` every `interval`.
    ///
    /// Claims are kept in `store` under `instance_id`.
    pub async fn new(
        job: Arc<RefreshJob>,
        store: Arc<dyn LiveStore>,
        instance_id: &str,
        interval: Duration,
    ) -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                scheduler,
                job,
                claims: RefreshClaims::new(store, instance_id, interval * CLAIM_TTL_INTERVALS),
                interval,
                tasks: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Start running registered tasks.
    pub async fn start(&self) -> AppResult<()> {
        self.inner
            .scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!(
            "Refresh scheduler started (every {}s)",
            self.inner.interval.as_secs()
        );
        Ok(())
    }

    /// Stop the scheduler and release every claim this registry holds.
    ///
    /// Running tasks are not awaited.
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut scheduler = self.inner.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        let held: Vec<StreamId> = self.inner.tasks.lock().await.drain().map(|(id, _)| id).collect();
        for id in &held {
            self.inner.release_claim(*id).await;
        }
        tracing::info!("Refresh scheduler shut down, released {} claims", held.len());
        Ok(())
    }

    fn build_job(&self, id: StreamId, channel: &str) -> AppResult<CronJob> {
        let job = Arc::clone(&self.inner.job);
        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let channel = channel.to_string();

        CronJob::new_repeated_async(self.inner.interval, move |job_id, _lock| {
            let job = Arc::clone(&job);
            let registry = registry.clone();
            let channel = channel.clone();
            Box::pin(async move {
                let Some(inner) = registry.upgrade() else {
                    return;
                };
                if !inner.holds_claim(id).await {
                    tracing::info!(
                        stream_id = %id,
                        "Refresh task owned by another instance, retiring local task"
                    );
                    tokio::spawn(async move { inner.retire(id, job_id).await });
                    return;
                }

                let retire = match job.run(id, &channel).await {
                    Ok(outcome) => outcome.is_terminal(),
                    Err(e) => {
                        tracing::warn!(
                            stream_id = %id,
                            channel = %channel,
                            error = %e,
                            "Refresh failed, retrying next tick"
                        );
                        false
                    }
                };

                if retire {
                    // Removing a job from inside its own run must not wait
                    // on the scheduler.
                    tokio::spawn(async move { inner.retire(id, job_id).await });
                }
            })
        })
        .map_err(|e| {
            AppError::internal(format!("Failed to create refresh task for stream {}: {}", id, e))
        })
    }
}

#[async_trait]
impl RefreshRegistry for CronRefreshTasks {
    async fn register(&self, id: StreamId, channel: &str) -> AppResult<bool> {
        let mut tasks = self.inner.tasks.lock().await;
        if tasks
            .get(&id)
            .is_some_and(|t| t.channel.eq_ignore_ascii_case(channel))
        {
            return Ok(false);
        }

        let replacing = tasks.contains_key(&id);
        if !replacing && !self.inner.claims.acquire(id).await? {
            tracing::debug!("Refresh task for stream {} is owned by another instance", id);
            return Ok(false);
        }

        let cron_job = match self.build_job(id, channel) {
            Ok(job) => job,
            Err(e) => {
                if !replacing {
                    self.inner.release_claim(id).await;
                }
                return Err(e);
            }
        };
        let added = self.inner.scheduler.add(cron_job).await;
        let job_id = match added {
            Ok(job_id) => job_id,
            Err(e) => {
                if !replacing {
                    self.inner.release_claim(id).await;
                }
                return Err(AppError::internal(format!(
                    "Failed to add refresh task for stream {}: {}",
                    id, e
                )));
            }
        };

        let previous = tasks.insert(
            id,
            TaskEntry {
                job_id,
                channel: channel.to_string(),
            },
        );
        if let Some(previous) = previous {
            if let Err(e) = self.inner.scheduler.remove(&previous.job_id).await {
                tracing::warn!("Failed to remove replaced refresh task for stream {}: {}", id, e);
            }
            tracing::info!("Replaced refresh task for stream {} ({})", id, channel);
        } else {
            tracing::debug!("Registered refresh task for stream {} ({})", id, channel);
        }
        Ok(true)
    }

    async fn cancel(&self, id: StreamId) -> AppResult<bool> {
        let mut tasks = self.inner.tasks.lock().await;
        let Some(entry) = tasks.remove(&id) else {
            return Ok(false);
        };
        self.inner.scheduler.remove(&entry.job_id).await.map_err(|e| {
            AppError::internal(format!("Failed to remove refresh task for stream {}: {}", id, e))
        })?;
        self.inner.release_claim(id).await;
        tracing::debug!("Cancelled refresh task for stream {}", id);
        Ok(true)
    }

    async fn active(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.inner.tasks.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }
}
