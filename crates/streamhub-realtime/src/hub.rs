//! Presence hub: the channel → connection registry of one instance.
//!
//! A single task owns the registry and applies commands in arrival order,
//! so register, unregister and shutdown never interleave. After every
//! change the task mirrors the channel's count into a [`DashMap`] that the
//! publisher reads without going through the command queue.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;

use crate::handle::{ConnectionHandle, ConnectionId};
use crate::message::OutboundMessage;

/// One channel's local presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTally {
    /// Normalized channel name.
    pub channel: String,
    /// Open connections on this instance.
    pub viewers: u64,
    /// Latest thumbnail candidate reported by a viewer.
    pub thumbnail: Option<String>,
}

enum HubCommand {
    Register {
        handle: Arc<ConnectionHandle>,
        reply: oneshot::Sender<u64>,
    },
    Unregister {
        id: ConnectionId,
        channel: String,
    },
    Thumbnail {
        channel: String,
        url: String,
    },
    Broadcast {
        channel: String,
        message: OutboundMessage,
        reply: oneshot::Sender<usize>,
    },
    Count {
        channel: String,
        reply: oneshot::Sender<u64>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Default)]
struct ChannelEntry {
    connections: HashMap<ConnectionId, Arc<ConnectionHandle>>,
    thumbnail: Option<String>,
}

struct Registry {
    channels: HashMap<String, ChannelEntry>,
    tallies: Arc<DashMap<String, ChannelTally>>,
}

impl Registry {
    fn register(&mut self, handle: Arc<ConnectionHandle>) -> u64 {
        let channel = normalize(&handle.channel);
        let entry = self.channels.entry(channel.clone()).or_default();
        entry.connections.insert(handle.id, handle);
        self.mirror(&channel)
    }

    fn unregister(&mut self, id: ConnectionId, channel: &str) -> bool {
        let channel = normalize(channel);
        let Some(entry) = self.channels.get_mut(&channel) else {
            return false;
        };
        let Some(handle) = entry.connections.remove(&id) else {
            return false;
        };
        handle.mark_closed();
        if entry.connections.is_empty() {
            self.channels.remove(&channel);
        }
        self.mirror(&channel);
        true
    }

    fn set_thumbnail(&mut self, channel: &str, url: String) {
        let channel = normalize(channel);
        if let Some(entry) = self.channels.get_mut(&channel) {
            entry.thumbnail = Some(url);
            self.mirror(&channel);
        }
    }

    /// Send `message` to every connection on `channel`. Connections found
    /// dead are dropped. Returns how many accepted the message.
    fn broadcast(&mut self, channel: &str, message: &OutboundMessage) -> usize {
        let channel = normalize(channel);
        let Some(entry) = self.channels.get_mut(&channel) else {
            return 0;
        };

        let mut delivered = 0;
        entry.connections.retain(|_, handle| {
            if handle.send(message.clone()) {
                delivered += 1;
            }
            handle.is_alive()
        });
        if entry.connections.is_empty() {
            self.channels.remove(&channel);
        }
        self.mirror(&channel);
        delivered
    }

    fn count(&self, channel: &str) -> u64 {
        self.channels
            .get(&normalize(channel))
            .map_or(0, |entry| entry.connections.len() as u64)
    }

    fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for (_, entry) in self.channels.drain() {
            for (_, handle) in entry.connections {
                handle.send(OutboundMessage::Closing {
                    reason: "server shutting down".into(),
                });
                handle.mark_closed();
                closed += 1;
            }
        }
        self.tallies.clear();
        closed
    }

    /// Sync the mirror for one channel; returns its count.
    fn mirror(&self, channel: &str) -> u64 {
        match self.channels.get(channel) {
            Some(entry) => {
                let viewers = entry.connections.len() as u64;
                self.tallies.insert(
                    channel.to_string(),
                    ChannelTally {
                        channel: channel.to_string(),
                        viewers,
                        thumbnail: entry.thumbnail.clone(),
                    },
                );
                viewers
            }
            None => {
                self.tallies.remove(channel);
                0
            }
        }
    }
}

fn normalize(channel: &str) -> String {
    channel.trim().to_lowercase()
}

/// Handle to the presence hub task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PresenceHub {
    commands: mpsc::Sender<HubCommand>,
    tallies: Arc<DashMap<String, ChannelTally>>,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { handle, .. } => write!(f, "Register({})", handle.id),
            Self::Unregister { id, .. } => write!(f, "Unregister({id})"),
            Self::Thumbnail { channel, .. } => write!(f, "Thumbnail({channel})"),
            Self::Broadcast { channel, .. } => write!(f, "Broadcast({channel})"),
            Self::Count { channel, .. } => write!(f, "Count({channel})"),
            Self::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl PresenceHub {
    /// Spawn the hub task with a command queue of `buffer` entries.
    pub fn spawn(buffer: usize) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(buffer.max(1));
        let tallies = Arc::new(DashMap::new());
        let registry = Registry {
            channels: HashMap::new(),
            tallies: Arc::clone(&tallies),
        };
        let task = tokio::spawn(run(registry, rx));
        (Self { commands, tallies }, task)
    }

    /// Register a connection. Returns the channel's local count after it.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> AppResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Register { handle, reply }).await?;
        rx.await.map_err(|_| hub_stopped())
    }

    /// Remove a connection. Removing an unknown connection is a no-op.
    pub async fn unregister(&self, id: ConnectionId, channel: &str) {
        let command = HubCommand::Unregister {
            id,
            channel: channel.to_string(),
        };
        if self.send(command).await.is_err() {
            debug!(conn_id = %id, "Hub stopped before unregister");
        }
    }

    /// Record a thumbnail candidate for a channel with open connections.
    pub async fn set_thumbnail(&self, channel: &str, url: &str) -> AppResult<()> {
        self.send(HubCommand::Thumbnail {
            channel: channel.to_string(),
            url: url.to_string(),
        })
        .await
    }

    /// Send a message to every local connection watching `channel`.
    ///
    /// Returns how many connections accepted it.
    pub async fn broadcast(&self, channel: &str, message: OutboundMessage) -> AppResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Broadcast {
            channel: channel.to_string(),
            message,
            reply,
        })
        .await?;
        rx.await.map_err(|_| hub_stopped())
    }

    /// Local viewer count of a channel, ordered after every earlier command.
    pub async fn viewer_count(&self, channel: &str) -> AppResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count {
            channel: channel.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| hub_stopped())
    }

    /// Channels with at least one connection, as last mirrored.
    pub fn snapshot(&self) -> Vec<ChannelTally> {
        let mut tallies: Vec<ChannelTally> =
            self.tallies.iter().map(|r| r.value().clone()).collect();
        tallies.sort_by(|a, b| a.channel.cmp(&b.channel));
        tallies
    }

    /// Close every connection and stop the hub. Returns how many were open.
    pub async fn shutdown(&self) -> AppResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| hub_stopped())
    }

    async fn send(&self, command: HubCommand) -> AppResult<()> {
        self.commands.send(command).await.map_err(|_| hub_stopped())
    }
}

fn hub_stopped() -> AppError {
    AppError::service_unavailable("Presence hub is not running")
}

async fn run(mut registry: Registry, mut rx: mpsc::Receiver<HubCommand>) {
    info!("Presence hub started");

    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Register { handle, reply } => {
                let conn_id = handle.id;
                let viewers = registry.register(handle);
                debug!(conn_id = %conn_id, viewers, "Connection registered");
                let _ = reply.send(viewers);
            }
            HubCommand::Unregister { id, channel } => {
                if registry.unregister(id, &channel) {
                    debug!(conn_id = %id, channel = %channel, "Connection unregistered");
                }
            }
            HubCommand::Thumbnail { channel, url } => registry.set_thumbnail(&channel, url),
            HubCommand::Broadcast {
                channel,
                message,
                reply,
            } => {
                let delivered = registry.broadcast(&channel, &message);
                debug!(channel = %channel, delivered, "Broadcast sent");
                let _ = reply.send(delivered);
            }
            HubCommand::Count { channel, reply } => {
                let _ = reply.send(registry.count(&channel));
            }
            HubCommand::Shutdown { reply } => {
                let closed = registry.close_all();
                info!("Presence hub closed {} connections", closed);
                let _ = reply.send(closed);
                break;
            }
        }
    }

    info!("Presence hub stopped");
}
