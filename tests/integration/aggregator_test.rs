//! Integration tests for the category leaderboard aggregator.

mod helpers;

use streamhub_core::types::StreamId;
use streamhub_database::DurableStore;
use streamhub_entity::category::Category;
use streamhub_entity::stream::StreamCategory;
use streamhub_worker::CategoryLeaderboardAggregator;

use helpers::{TestCluster, stream};

fn stream_category(category: &Category) -> StreamCategory {
    StreamCategory {
        id: category.id,
        name: category.name.clone(),
        slug: category.slug.clone(),
    }
}

#[tokio::test]
async fn test_top_hundred_sum_per_category() {
    let cluster = TestCluster::new();
    let games = stream_category(
        &cluster.durable.find_or_create_category("Games").await.unwrap(),
    );
    let music = stream_category(
        &cluster.durable.find_or_create_category("Music").await.unwrap(),
    );

    for i in 1..=150 {
        cluster
            .cache
            .create(&stream(i, &format!("gamer{i}"), games.clone()))
            .await
            .unwrap();
        cluster
            .cache
            .update_viewers(StreamId(i), i as u64)
            .await
            .unwrap();
    }
    cluster
        .cache
        .create(&stream(1000, "singer", music.clone()))
        .await
        .unwrap();
    cluster
        .cache
        .update_viewers(StreamId(1000), 12)
        .await
        .unwrap();

    let aggregator = CategoryLeaderboardAggregator::new(
        cluster.cache.clone(),
        cluster.durable.clone(),
        100,
    );
    let summary = aggregator.recompute().await.unwrap();
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.failed, 0);

    // Viewers 51..=150 make the top hundred.
    assert_eq!(
        cluster.cache.category_viewers(games.id).await.unwrap(),
        Some(10050)
    );
    assert_eq!(
        cluster.cache.category_viewers(music.id).await.unwrap(),
        Some(12)
    );
}

#[tokio::test]
async fn test_empty_category_aggregates_to_zero() {
    let cluster = TestCluster::new();
    let art = stream_category(&cluster.durable.find_or_create_category("Art").await.unwrap());

    let aggregator = CategoryLeaderboardAggregator::new(
        cluster.cache.clone(),
        cluster.durable.clone(),
        100,
    );
    assert_eq!(aggregator.recompute_category(art.id).await.unwrap(), 0);
    assert_eq!(cluster.cache.category_viewers(art.id).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_aggregate_follows_ended_streams() {
    let cluster = TestCluster::new();
    let first = cluster.start_native("alice", "Games").await;
    let second = cluster.start_native("bob", "Games").await;
    cluster.cache.update_viewers(first.id, 40).await.unwrap();
    cluster.cache.update_viewers(second.id, 2).await.unwrap();

    let aggregator = CategoryLeaderboardAggregator::new(
        cluster.cache.clone(),
        cluster.durable.clone(),
        100,
    );
    assert_eq!(aggregator.recompute_category(first.category.id).await.unwrap(), 42);

    cluster
        .lifecycle
        .end(streamhub_cache::StreamTarget::Id(first.id))
        .await
        .unwrap();
    aggregator.recompute().await.unwrap();
    assert_eq!(
        cluster.cache.category_viewers(first.category.id).await.unwrap(),
        Some(2)
    );
}
