//! Server and instance identity configuration.

use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

/// Identity of this running process within the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Stable instance identifier. Generated at startup when empty.
    #[serde(default)]
    pub id: Option<String>,
}

impl InstanceConfig {
    /// Return the configured identifier or generate a random one.
    pub fn resolve_id(&self) -> String {
        match self.id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("instance-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace() -> u64 {
    30
}
