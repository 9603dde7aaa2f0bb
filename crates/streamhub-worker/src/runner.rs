//! Worker runner: drives the poll, aggregation and presence loops.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing;

use streamhub_core::config::{AggregatorConfig, SchedulerConfig};
use streamhub_core::result::AppResult;

use crate::aggregator::CategoryLeaderboardAggregator;
use crate::listener::PresenceRefreshListener;
use crate::poller::PollScheduler;
use crate::tasks::CronRefreshTasks;

/// Runs every background loop of one instance until shutdown.
#[derive(Debug)]
pub struct WorkerRunner {
    scheduler: PollScheduler,
    tasks: CronRefreshTasks,
    aggregator: CategoryLeaderboardAggregator,
    listener: PresenceRefreshListener,
    scheduler_config: SchedulerConfig,
    aggregator_config: AggregatorConfig,
    instance_id: String,
}

impl WorkerRunner {
    /// Create a runner.
    pub fn new(
        scheduler: PollScheduler,
        tasks: CronRefreshTasks,
        aggregator: CategoryLeaderboardAggregator,
        listener: PresenceRefreshListener,
        scheduler_config: SchedulerConfig,
        aggregator_config: AggregatorConfig,
        instance_id: String,
    ) -> Self {
        Self {
            scheduler,
            tasks,
            aggregator,
            listener,
            scheduler_config,
            aggregator_config,
            instance_id,
        }
    }

    /// Start the refresh scheduler, restore tasks for streams already live,
    /// then run until the cancel signal is received.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> AppResult<()> {
        self.tasks.start().await?;
        if let Err(e) = self.scheduler.restore_refresh_tasks().await {
            tracing::warn!("Failed to restore refresh tasks: {}", e);
        }

        tracing::info!(
            "Worker '{}' started (polling={}, poll_interval={}s, aggregate_interval={}s)",
            self.instance_id,
            self.scheduler_config.enabled,
            self.scheduler_config.poll_interval_seconds,
            self.aggregator_config.interval_seconds
        );

        tokio::join!(
            self.poll_loop(cancel.clone()),
            self.aggregate_loop(cancel.clone()),
            self.listener.run(cancel.clone()),
        );

        if let Err(e) = self.tasks.shutdown().await {
            tracing::warn!("Failed to shut down refresh scheduler: {}", e);
        }
        tracing::info!("Worker '{}' shut down complete", self.instance_id);
        Ok(())
    }

    async fn poll_loop(&self, cancel: watch::Receiver<bool>) {
        if !self.scheduler_config.enabled {
            tracing::info!("Polling disabled on worker '{}'", self.instance_id);
            return;
        }
        let interval = Duration::from_secs(self.scheduler_config.poll_interval_seconds.max(1));
        self.scheduler.run(interval, cancel).await;
    }

    async fn aggregate_loop(&self, cancel: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.aggregator_config.interval_seconds.max(1));
        self.aggregator.run(interval, cancel).await;
    }
}

/// Sleep for `period`. Returns `false` if cancelled first.
///
/// Loops call this between passes only, so a pass in flight always
/// finishes.
pub(crate) async fn sleep_or_cancel(cancel: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        changed = cancel.changed() => changed.is_ok() && !*cancel.borrow(),
        _ = time::sleep(period) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_or_cancel() {
        let (tx, mut rx) = watch::channel(false);
        assert!(sleep_or_cancel(&mut rx, Duration::from_millis(5)).await);

        tx.send(true).unwrap();
        assert!(!sleep_or_cancel(&mut rx, Duration::from_secs(60)).await);
    }
}
