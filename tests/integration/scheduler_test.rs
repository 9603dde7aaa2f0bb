//! Integration tests for the distributed poll scheduler and refresh tasks.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use streamhub_cache::keys;
use streamhub_core::error::ErrorKind;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::{StreamId, ViewerMergePolicy};
use streamhub_worker::{CronRefreshTasks, PollOutcome, RefreshJob, RefreshRegistry};

use helpers::{RecordingRegistry, TestCluster, channel};

fn refresh_job(cluster: &TestCluster) -> Arc<RefreshJob> {
    Arc::new(RefreshJob::new(
        cluster.service.clone(),
        cluster.lifecycle.clone(),
        cluster.ledger.clone(),
        ViewerMergePolicy::LatestSignal,
    ))
}

async fn cron_tasks(cluster: &TestCluster, instance: &str, interval: Duration) -> CronRefreshTasks {
    CronRefreshTasks::new(refresh_job(cluster), cluster.store.clone(), instance, interval)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_racing_instances_reconcile_once() {
    let cluster = TestCluster::new();
    cluster
        .service
        .set_live(vec![channel("alice", "Games", 10), channel("bob", "Music", 5)]);
    cluster.service.set_list_delay(Duration::from_millis(100));

    let a = cluster.scheduler("instance-a", Arc::new(RecordingRegistry::default()));
    let b = cluster.scheduler("instance-b", Arc::new(RecordingRegistry::default()));

    let (first, second) = tokio::join!(a.tick(), b.tick());
    let outcomes = [first.unwrap(), second.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, PollOutcome::Completed(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, PollOutcome::Skipped))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(skipped, 1);
    assert_eq!(cluster.service.list_calls(), 1);
    assert_eq!(cluster.cache.live_ids().await.unwrap().len(), 2);
    assert_eq!(cluster.durable.live_streams().await.len(), 2);
}

#[tokio::test]
async fn test_lock_is_released_after_a_pass() {
    let cluster = TestCluster::new();
    cluster.service.set_live(vec![channel("alice", "Games", 10)]);

    let a = cluster.scheduler("instance-a", Arc::new(RecordingRegistry::default()));
    let b = cluster.scheduler("instance-b", Arc::new(RecordingRegistry::default()));

    assert!(matches!(a.tick().await.unwrap(), PollOutcome::Completed(_)));
    match b.tick().await.unwrap() {
        PollOutcome::Completed(summary) => {
            assert_eq!(summary.seen, 1);
            assert_eq!(summary.created, 0);
        }
        PollOutcome::Skipped => panic!("lock was not released"),
    }
}

#[tokio::test]
async fn test_every_channel_gets_a_refresh_task() {
    let cluster = TestCluster::new();
    let live: Vec<_> = (0..120)
        .map(|i| channel(&format!("chan{i}"), "Games", i))
        .collect();
    cluster.service.set_live(live);

    let registry = Arc::new(RecordingRegistry::default());
    let scheduler = cluster.scheduler("instance-a", registry.clone());

    match scheduler.tick().await.unwrap() {
        PollOutcome::Completed(summary) => {
            assert_eq!(summary.seen, 120);
            assert_eq!(summary.created, 120);
            assert_eq!(summary.failed, 0);
        }
        PollOutcome::Skipped => panic!("tick skipped"),
    }
    assert_eq!(registry.active().await.len(), 120);
    // 120 channels at page size 50: three pages.
    assert_eq!(cluster.service.list_calls(), 3);
}

#[tokio::test]
async fn test_upstream_outage_aborts_pass() {
    let cluster = TestCluster::new();
    cluster.service.set_live(vec![channel("alice", "Games", 10)]);
    let scheduler = cluster.scheduler("instance-a", Arc::new(RecordingRegistry::default()));
    scheduler.tick().await.unwrap();

    cluster.service.set_unavailable(true);
    let err = scheduler.tick().await.unwrap_err();
    assert!(err.is(ErrorKind::ExternalService));

    // Nothing was reaped by the aborted pass.
    assert!(cluster.cache.get_by_username("alice").await.is_ok());

    cluster.service.set_unavailable(false);
    assert!(matches!(
        scheduler.tick().await.unwrap(),
        PollOutcome::Completed(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_registration_yields_one_task() {
    let cluster = TestCluster::new();
    let tasks = cron_tasks(&cluster, "instance-a", Duration::from_secs(3600)).await;

    assert!(tasks.register(StreamId(1), "alice").await.unwrap());
    assert!(!tasks.register(StreamId(1), "alice").await.unwrap());
    assert_eq!(tasks.active().await, vec![StreamId(1)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_polls_keep_one_task_per_stream() {
    let cluster = TestCluster::new();
    cluster
        .service
        .set_live(vec![channel("alice", "Games", 10), channel("bob", "Games", 3)]);
    let tasks = Arc::new(cron_tasks(&cluster, "instance-a", Duration::from_secs(3600)).await);
    let scheduler = cluster.scheduler("instance-a", tasks.clone());

    for _ in 0..3 {
        scheduler.tick().await.unwrap();
    }
    assert_eq!(tasks.active().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refresh_task_ends_offline_stream_and_retires() {
    let cluster = TestCluster::new();
    cluster.service.set_live(vec![channel("alice", "Games", 10)]);
    cluster.service.set_details("alice", 77, Some("https://cdn/alice.jpg"));

    let tasks = Arc::new(cron_tasks(&cluster, "instance-a", Duration::from_secs(1)).await);
    tasks.start().await.unwrap();
    let scheduler = cluster.scheduler("instance-a", tasks.clone());
    scheduler.tick().await.unwrap();
    let stream = cluster.cache.get_by_username("alice").await.unwrap();

    let mut refreshed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if cluster.cache.get(stream.id).await.unwrap().viewers == 77 {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "refresh task never ran");
    assert!(cluster.durable.stream(stream.id).await.unwrap().viewers >= 77);

    cluster.service.set_offline("alice");
    let mut retired = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if tasks.active().await.is_empty() {
            retired = true;
            break;
        }
    }
    assert!(retired, "refresh task was not retired");
    assert!(!cluster.cache.is_live(stream.id).await.unwrap());
    assert!(!cluster.durable.stream(stream.id).await.unwrap().is_live());

    tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restore_after_restart() {
    let cluster = TestCluster::new();
    cluster
        .service
        .set_live(vec![channel("alice", "Games", 10), channel("bob", "Games", 3)]);
    cluster
        .scheduler("instance-a", Arc::new(RecordingRegistry::default()))
        .tick()
        .await
        .unwrap();
    cluster.start_native("carol", "Art").await;

    let registry = Arc::new(RecordingRegistry::default());
    let restarted = cluster.scheduler("instance-b", registry.clone());
    assert_eq!(restarted.restore_refresh_tasks().await.unwrap(), 2);
    assert_eq!(registry.active().await.len(), 2);
}

#[tokio::test]
async fn test_vanished_channel_is_reaped_but_native_stays() {
    let cluster = TestCluster::new();
    cluster
        .service
        .set_live(vec![channel("alice", "Games", 10), channel("bob", "Games", 3)]);
    let registry = Arc::new(RecordingRegistry::default());
    let scheduler = cluster.scheduler("instance-a", registry.clone());
    scheduler.tick().await.unwrap();
    cluster.start_native("carol", "Art").await;

    cluster.service.set_live(vec![channel("alice", "Games", 10)]);
    match scheduler.tick().await.unwrap() {
        PollOutcome::Completed(summary) => assert_eq!(summary.ended, 1),
        PollOutcome::Skipped => panic!("tick skipped"),
    }

    let live: Vec<String> = cluster
        .cache
        .live_streams(10)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.owner.username)
        .collect();
    assert_eq!(live.len(), 2);
    assert!(live.contains(&"alice".to_string()));
    assert!(live.contains(&"carol".to_string()));
    assert_eq!(registry.active().await.len(), 1);
}

#[tokio::test]
async fn test_upstream_category_change_follows_stream() {
    let cluster = TestCluster::new();
    cluster.service.set_live(vec![channel("alice", "Games", 10)]);
    let scheduler = cluster.scheduler("instance-a", Arc::new(RecordingRegistry::default()));
    scheduler.tick().await.unwrap();
    let before = cluster.cache.get_by_username("alice").await.unwrap();

    cluster.service.set_live(vec![channel("alice", "Music", 10)]);
    scheduler.tick().await.unwrap();

    let after = cluster.cache.get_by_username("alice").await.unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.category.slug, "music");
    assert_eq!(after.title, "alice playing Music");
    assert_eq!(cluster.cache.count(before.category.id).await.unwrap(), 0);
    assert_eq!(cluster.cache.count(after.category.id).await.unwrap(), 1);
    assert_eq!(
        cluster.durable.stream(after.id).await.unwrap().category_id,
        after.category.id
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_instances_refresh_each_stream_once() {
    let cluster = TestCluster::new();
    cluster.service.set_live(vec![channel("alice", "Games", 10)]);
    cluster.service.set_details("alice", 5, None);

    let tasks_a = Arc::new(cron_tasks(&cluster, "instance-a", Duration::from_secs(1)).await);
    let tasks_b = Arc::new(cron_tasks(&cluster, "instance-b", Duration::from_secs(1)).await);
    tasks_a.start().await.unwrap();
    tasks_b.start().await.unwrap();

    let a = cluster.scheduler("instance-a", tasks_a.clone());
    let b = cluster.scheduler("instance-b", tasks_b.clone());
    a.tick().await.unwrap();
    b.tick().await.unwrap();
    a.restore_refresh_tasks().await.unwrap();
    b.restore_refresh_tasks().await.unwrap();

    let stream = cluster.cache.get_by_username("alice").await.unwrap();
    assert_eq!(tasks_a.active().await, vec![stream.id]);
    assert!(tasks_b.active().await.is_empty());

    tokio::time::sleep(Duration::from_millis(3500)).await;
    // One task at a 1s interval fires at most four times in 3.5s.
    let calls = cluster.service.detail_calls();
    assert!((1..=4).contains(&calls), "get_channel called {calls} times");

    tasks_a.shutdown().await.unwrap();
    tasks_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_mid_pass_finishes_the_pass() {
    let cluster = TestCluster::new();
    cluster
        .service
        .set_live(vec![channel("alice", "Games", 10), channel("bob", "Music", 5)]);
    cluster.service.set_list_delay(Duration::from_millis(200));
    let scheduler = cluster.scheduler("instance-a", Arc::new(RecordingRegistry::default()));

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(async move {
        scheduler.run(Duration::from_secs(60), rx).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("poll loop did not stop")
        .unwrap();

    assert_eq!(cluster.service.list_calls(), 1);
    assert!(cluster.store.get(keys::POLL_LOCK).await.unwrap().is_none());

    let mut durable_live: Vec<StreamId> = cluster
        .durable
        .live_streams()
        .await
        .into_iter()
        .map(|row| row.id)
        .collect();
    durable_live.sort();
    let mut cached = cluster.cache.live_ids().await.unwrap();
    cached.sort();
    assert_eq!(durable_live.len(), 2);
    assert_eq!(durable_live, cached);
}
