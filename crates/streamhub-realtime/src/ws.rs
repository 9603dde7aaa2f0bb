//! WebSocket adapter feeding viewer connections into the presence hub.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::PresenceEngine;
use crate::handle::ConnectionHandle;
use crate::message::{InboundMessage, OutboundMessage};

/// Routes served by the presence engine.
pub fn router(engine: PresenceEngine) -> Router {
    Router::new()
        .route("/ws/presence", get(presence_ws_handler))
        .with_state(engine)
}

/// GET /ws/presence (WebSocket upgrade)
pub async fn presence_ws_handler(
    State(engine): State<PresenceEngine>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(engine, socket))
}

/// Drives one connection: join, register, receive until close, unregister.
async fn handle_socket(engine: PresenceEngine, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let join_timeout = Duration::from_secs(engine.config().join_timeout_seconds);
    let channel = match tokio::time::timeout(join_timeout, read_join(&mut ws_rx)).await {
        Ok(Ok(channel)) => channel,
        Ok(Err(reason)) => {
            reject(&mut ws_tx, "invalid_join", reason).await;
            return;
        }
        Err(_) => {
            reject(&mut ws_tx, "join_timeout", "no join message received").await;
            return;
        }
    };

    let (tx, mut outbound_rx) = mpsc::channel(engine.config().connection_buffer_size.max(1));
    let handle = Arc::new(ConnectionHandle::new(channel.clone(), tx));
    let conn_id = handle.id;

    let viewers = match engine.hub().register(handle.clone()).await {
        Ok(viewers) => viewers,
        Err(e) => {
            reject(&mut ws_tx, "unavailable", e.to_string()).await;
            return;
        }
    };
    handle.send(OutboundMessage::Joined {
        channel: channel.clone(),
        viewers,
    });

    info!(conn_id = %conn_id, channel = %channel, viewers, "Viewer joined");

    let mut outbound_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, OutboundMessage::Closing { .. });
            if send_json(&mut ws_tx, &msg).await.is_err() {
                return;
            }
            if closing {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut outbound_task => break,
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<InboundMessage>(text.as_str()) {
                        Ok(InboundMessage::Thumbnail { url }) => {
                            if let Err(e) = engine.hub().set_thumbnail(&channel, &url).await {
                                warn!(conn_id = %conn_id, error = %e, "Failed to record thumbnail");
                                break;
                            }
                        }
                        Ok(InboundMessage::Join { .. }) => {
                            handle.send(OutboundMessage::error(
                                "already_joined",
                                "connection already joined a channel",
                            ));
                        }
                        Err(e) => {
                            handle.send(OutboundMessage::error("invalid_message", e.to_string()));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    engine.hub().unregister(conn_id, &channel).await;
    outbound_task.abort();

    info!(conn_id = %conn_id, channel = %channel, "Viewer left");
}

/// Wait for the first meaningful frame, which must be a join.
async fn read_join(ws_rx: &mut SplitStream<WebSocket>) -> Result<String, String> {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<InboundMessage>(text.as_str()) {
                    Ok(InboundMessage::Join { channel }) if !channel.trim().is_empty() => {
                        Ok(channel.trim().to_string())
                    }
                    Ok(InboundMessage::Join { .. }) => Err("channel must not be empty".into()),
                    Ok(_) => Err("first message must be a join".into()),
                    Err(e) => Err(e.to_string()),
                };
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => return Err("binary frames are not supported".into()),
            Ok(Message::Close(_)) => return Err("closed before join".into()),
            Err(e) => return Err(e.to_string()),
        }
    }
    Err("closed before join".into())
}

async fn reject(ws_tx: &mut SplitSink<WebSocket, Message>, code: &str, reason: impl Into<String>) {
    let reason = reason.into();
    warn!(code, reason = %reason, "Rejecting presence connection");
    let _ = send_json(ws_tx, &OutboundMessage::error(code, reason)).await;
    let _ = ws_tx.send(Message::Close(None)).await;
}

async fn send_json(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: &OutboundMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to serialize outbound message");
            Ok(())
        }
    }
}
