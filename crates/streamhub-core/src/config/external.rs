//! External streaming service client configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for the upstream streaming service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServiceConfig {
    /// Base URL of the service API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Client identifier sent as `Client-Id`.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Bearer token for authenticated calls.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Page size used when listing live channels.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ExternalServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: None,
            access_token: None,
            timeout_seconds: default_timeout(),
            page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:9000/api".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_page_size() -> u32 {
    100
}
