//! Integration tests for the presence hub, publisher and WebSocket adapter.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use streamhub_core::config::PresenceConfig;
use streamhub_core::types::ViewerMergePolicy;
use streamhub_realtime::{ConnectionHandle, PresenceEngine};
use streamhub_worker::PresenceRefreshListener;

use helpers::{RecordingRegistry, TestCluster};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn engine(cluster: &TestCluster, instance: &str) -> PresenceEngine {
    PresenceEngine::new(
        PresenceConfig::default(),
        cluster.ledger.clone(),
        cluster.bus.clone(),
        instance,
    )
}

fn listener(cluster: &TestCluster) -> PresenceRefreshListener {
    PresenceRefreshListener::new(
        cluster.bus.clone(),
        cluster.cache.clone(),
        cluster.ledger.clone(),
        Arc::new(RecordingRegistry::default()),
        ViewerMergePolicy::LatestSignal,
    )
}

async fn serve(engine: PresenceEngine) -> String {
    let app = streamhub_realtime::ws::router(engine);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws/presence")
}

async fn next_json(client: &mut Client) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within timeout")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn join(url: &str, channel: &str) -> Client {
    let (mut client, _) = connect_async(url).await.unwrap();
    let join = serde_json::json!({ "type": "join", "channel": channel }).to_string();
    client.send(Message::Text(join.into())).await.unwrap();
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "joined");
    client
}

#[tokio::test]
async fn test_presence_reaches_stream_and_drops_to_zero() {
    let cluster = TestCluster::new();
    let stream = cluster.start_native("alice", "Games").await;
    let engine = engine(&cluster, "instance-a");
    let listener = listener(&cluster);

    let (tx, _rx) = mpsc::channel(8);
    let first = Arc::new(ConnectionHandle::new("alice", tx.clone()));
    let second = Arc::new(ConnectionHandle::new("alice", tx));
    engine.hub().register(first.clone()).await.unwrap();
    engine.hub().register(second.clone()).await.unwrap();

    engine.publisher().publish_once().await;
    assert!(listener.refresh_channel("alice").await.unwrap());
    assert_eq!(cluster.cache.get(stream.id).await.unwrap().viewers, 2);

    engine.hub().unregister(first.id, "alice").await;
    engine.hub().unregister(second.id, "alice").await;
    assert_eq!(engine.hub().viewer_count("alice").await.unwrap(), 0);
    assert!(engine.hub().snapshot().is_empty());

    engine.publisher().publish_once().await;
    assert!(listener.refresh_channel("alice").await.unwrap());
    assert_eq!(cluster.cache.get(stream.id).await.unwrap().viewers, 0);
    assert!(cluster.ledger.pending_channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tallies_sum_across_instances() {
    let cluster = TestCluster::new();
    let stream = cluster.start_native("alice", "Games").await;
    let a = engine(&cluster, "instance-a");
    let b = engine(&cluster, "instance-b");

    let (tx, _rx) = mpsc::channel(8);
    for _ in 0..3 {
        a.hub()
            .register(Arc::new(ConnectionHandle::new("alice", tx.clone())))
            .await
            .unwrap();
    }
    b.hub()
        .register(Arc::new(ConnectionHandle::new("ALICE", tx)))
        .await
        .unwrap();

    a.publisher().publish_once().await;
    b.publisher().publish_once().await;
    assert_eq!(cluster.ledger.presence_total("alice").await.unwrap(), 4);

    assert_eq!(listener(&cluster).drain_pending().await, 1);
    assert_eq!(cluster.cache.get(stream.id).await.unwrap().viewers, 4);

    b.shutdown().await.unwrap();
    assert_eq!(cluster.ledger.presence_total("alice").await.unwrap(), 3);
}

#[tokio::test]
async fn test_channel_without_stream_is_dropped_from_pending() {
    let cluster = TestCluster::new();
    let engine = engine(&cluster, "instance-a");
    let (tx, _rx) = mpsc::channel(8);
    engine
        .hub()
        .register(Arc::new(ConnectionHandle::new("nobody", tx)))
        .await
        .unwrap();
    engine.publisher().publish_once().await;

    assert!(!listener(&cluster).refresh_channel("nobody").await.unwrap());
    assert!(cluster.ledger.pending_channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_websocket_viewers_are_counted() {
    let cluster = TestCluster::new();
    let engine = engine(&cluster, "instance-a");
    let url = serve(engine.clone()).await;

    let mut first = join(&url, "alice").await;
    let mut second = join(&url, "alice").await;
    assert_eq!(engine.hub().viewer_count("alice").await.unwrap(), 2);

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();

    let mut drained = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if engine.hub().viewer_count("alice").await.unwrap() == 0 {
            drained = true;
            break;
        }
    }
    assert!(drained, "connections were not unregistered");
    assert!(engine.hub().snapshot().is_empty());
}

#[tokio::test]
async fn test_websocket_rejects_non_join_first_message() {
    let cluster = TestCluster::new();
    let url = serve(engine(&cluster, "instance-a")).await;

    let (mut client, _) = connect_async(&url).await.unwrap();
    let thumbnail = serde_json::json!({ "type": "thumbnail", "url": "https://x/y.jpg" }).to_string();
    client.send(Message::Text(thumbnail.into())).await.unwrap();

    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "invalid_join");
}

#[tokio::test]
async fn test_shutdown_sends_closing_to_viewers() {
    let cluster = TestCluster::new();
    let engine = engine(&cluster, "instance-a");
    let url = serve(engine.clone()).await;

    let mut client = join(&url, "alice").await;
    engine.shutdown().await.unwrap();

    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "closing");
}
