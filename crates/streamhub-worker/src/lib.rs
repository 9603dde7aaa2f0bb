//! Background reconciliation for StreamHub.
//!
//! This crate provides:
//! - A poll scheduler that reconciles live channels from the upstream
//!   service under a cluster-wide lock
//! - Per-stream refresh tasks on a cron scheduler, one per stream across
//!   the cluster
//! - The category leaderboard aggregator
//! - A listener applying presence tallies published by the hubs
//! - A worker runner that drives all loops until shutdown

pub mod aggregator;
pub mod claim;
pub mod lifecycle;
pub mod listener;
pub mod lock;
pub mod poller;
pub mod refresh;
pub mod runner;
pub mod tasks;

pub use aggregator::{AggregateSummary, CategoryLeaderboardAggregator};
pub use claim::RefreshClaims;
pub use lifecycle::{StartStream, StreamLifecycle};
pub use listener::PresenceRefreshListener;
pub use lock::PollLock;
pub use poller::{PollOutcome, PollScheduler, PollSummary};
pub use refresh::{RefreshJob, RefreshOutcome};
pub use runner::WorkerRunner;
pub use tasks::{CronRefreshTasks, RefreshRegistry};
