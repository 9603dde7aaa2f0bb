//! Category leaderboard aggregation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing;

use streamhub_cache::LiveStateCache;
use streamhub_core::result::AppResult;
use streamhub_core::types::CategoryId;
use streamhub_database::DurableStore;

use crate::runner::sleep_or_cancel;

/// Counters of one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Categories whose aggregate was written.
    pub updated: usize,
    /// Categories that failed.
    pub failed: usize,
}

/// Writes each category's top-N viewer sum to the category record.
#[derive(Debug, Clone)]
pub struct CategoryLeaderboardAggregator {
    cache: LiveStateCache,
    durable: Arc<dyn DurableStore>,
    top_n: usize,
}

impl CategoryLeaderboardAggregator {
    /// Create an aggregator summing the `top_n` largest streams.
    pub fn new(cache: LiveStateCache, durable: Arc<dyn DurableStore>, top_n: usize) -> Self {
        Self {
            cache,
            durable,
            top_n,
        }
    }

    /// Recompute every `interval` until cancelled, never abandoning a pass.
    pub async fn run(&self, interval: Duration, mut cancel: watch::Receiver<bool>) {
        while !*cancel.borrow() {
            if let Err(e) = self.recompute().await {
                tracing::warn!("Category aggregation failed: {}", e);
            }
            if !sleep_or_cancel(&mut cancel, interval).await {
                break;
            }
        }
        tracing::info!("Aggregation loop stopped");
    }

    /// Recompute every known category concurrently.
    ///
    /// Per-category failures are logged and counted; only failing to list
    /// the categories fails the pass.
    pub async fn recompute(&self) -> AppResult<AggregateSummary> {
        let categories = self.durable.list_categories().await?;
        let results = join_all(categories.iter().map(|c| self.recompute_category(c.id))).await;

        let mut summary = AggregateSummary::default();
        for (category, result) in categories.iter().zip(results) {
            match result {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        category_id = %category.id,
                        category = %category.name,
                        error = %e,
                        "Failed to aggregate category"
                    );
                }
            }
        }

        tracing::debug!(
            updated = summary.updated,
            failed = summary.failed,
            "Category aggregation finished"
        );
        Ok(summary)
    }

    /// Recompute one category, returning the aggregate written.
    pub async fn recompute_category(&self, category: CategoryId) -> AppResult<u64> {
        let total = self.cache.top_viewer_sum(category, self.top_n).await?;
        self.cache.set_category_viewers(category, total).await?;
        Ok(total)
    }
}
