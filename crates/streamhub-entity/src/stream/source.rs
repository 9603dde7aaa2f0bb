//! Stream origin enumeration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a live stream was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "stream_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    /// Reconciled from the upstream streaming service by the poller.
    External,
    /// Started directly on this platform.
    Native,
}

impl StreamSource {
    /// Return the source as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Native => "native",
        }
    }

    /// Whether the poller owns this stream's lifecycle.
    pub fn is_polled(&self) -> bool {
        matches!(self, Self::External)
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external" => Ok(Self::External),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown stream source '{other}'")),
        }
    }
}
