//! Integration tests for the live-state cache.

mod helpers;

use streamhub_cache::{StreamTarget, keys};
use streamhub_core::error::ErrorKind;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::{CategoryId, PageRequest, StreamId, Transaction};

use helpers::{TestCluster, category, stream};

#[tokio::test]
async fn test_create_is_visible_everywhere() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    cluster.cache.create(&stream(7, "alice", games.clone())).await.unwrap();

    assert_eq!(cluster.cache.get(StreamId(7)).await.unwrap().id, StreamId(7));
    assert_eq!(
        cluster.cache.get_by_username("ALICE").await.unwrap().id,
        StreamId(7)
    );
    assert_eq!(cluster.cache.live_ids().await.unwrap(), vec![StreamId(7)]);

    let listed = cluster
        .cache
        .list(games.id, PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, StreamId(7));
}

#[tokio::test]
async fn test_second_create_for_live_user_fails() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    cluster.cache.create(&stream(1, "alice", games.clone())).await.unwrap();

    let err = cluster
        .cache
        .create(&stream(2, "alice", games.clone()))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AlreadyLive));

    assert_eq!(cluster.cache.count(games.id).await.unwrap(), 1);
    assert_eq!(cluster.cache.live_ids().await.unwrap(), vec![StreamId(1)]);
    assert!(cluster.cache.get(StreamId(2)).await.is_err());
}

#[tokio::test]
async fn test_concurrent_creates_admit_one() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");

    let a = stream(1, "alice", games.clone());
    let b = stream(2, "alice", games.clone());
    let (first, second) = tokio::join!(cluster.cache.create(&a), cluster.cache.create(&b));

    assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
    assert_eq!(cluster.cache.count(games.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_viewer_updates_order_the_listing() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        cluster.cache.create(&stream(id, name, games.clone())).await.unwrap();
    }
    cluster.cache.update_viewers(StreamId(1), 10).await.unwrap();
    cluster.cache.update_viewers(StreamId(2), 300).await.unwrap();
    cluster.cache.update_viewers(StreamId(3), 42).await.unwrap();

    let page = cluster
        .cache
        .list(games.id, PageRequest::new(1, 2))
        .await
        .unwrap();
    let ids: Vec<StreamId> = page.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![StreamId(2), StreamId(3)]);
    assert_eq!(page[0].viewers, 300);

    let rest = cluster
        .cache
        .list(games.id, PageRequest::new(2, 2))
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, StreamId(1));
}

#[tokio::test]
async fn test_category_change_moves_leaderboard_entry() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    let music = category(2, "Music");
    cluster.cache.create(&stream(1, "alice", games.clone())).await.unwrap();
    cluster.cache.update_viewers(StreamId(1), 25).await.unwrap();

    let updated = cluster
        .cache
        .update_metadata(StreamId(1), Some("now singing"), Some(&music))
        .await
        .unwrap();
    assert_eq!(updated.category.id, music.id);
    assert_eq!(updated.title, "now singing");

    assert_eq!(cluster.cache.count(games.id).await.unwrap(), 0);
    assert_eq!(cluster.cache.count(music.id).await.unwrap(), 1);
    assert_eq!(cluster.cache.top_viewer_sum(music.id, 100).await.unwrap(), 25);
    assert_eq!(
        cluster.cache.get(StreamId(1)).await.unwrap().category.slug,
        "music"
    );
}

#[tokio::test]
async fn test_delete_non_live_changes_nothing() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    cluster.cache.create(&stream(1, "alice", games.clone())).await.unwrap();

    let err = cluster
        .cache
        .delete(StreamTarget::Id(StreamId(99)))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AlreadyEnded));
    let err = cluster
        .cache
        .delete(StreamTarget::Username("bob".into()))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AlreadyEnded));

    assert_eq!(cluster.cache.live_ids().await.unwrap(), vec![StreamId(1)]);
    assert_eq!(cluster.cache.count(games.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_removes_every_reference() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    cluster.cache.create(&stream(1, "alice", games.clone())).await.unwrap();

    let ended = cluster.cache.delete(StreamTarget::Id(StreamId(1))).await.unwrap();
    assert_eq!(ended.owner.username, "alice");

    assert!(cluster.cache.live_ids().await.unwrap().is_empty());
    assert_eq!(cluster.cache.count(games.id).await.unwrap(), 0);
    assert!(cluster.store.get(&keys::user_stream("alice")).await.unwrap().is_none());
    let err = cluster.cache.get(StreamId(1)).await.unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_listing_skips_missing_records() {
    let cluster = TestCluster::new();
    let games = category(1, "Games");
    cluster.cache.create(&stream(1, "alice", games.clone())).await.unwrap();
    cluster.cache.create(&stream(2, "bob", games.clone())).await.unwrap();

    cluster
        .store
        .commit(Transaction::new().delete(keys::stream(StreamId(2))))
        .await
        .unwrap();

    let listed = cluster
        .cache
        .list(CategoryId(1), PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, StreamId(1));

    let err = cluster.cache.get_by_username("bob").await.unwrap_err();
    assert!(err.is(ErrorKind::InconsistentState));
}
