//! Connection status: transport readiness as seen by one proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Heartbeat intervals below this are refused as too aggressive.
pub const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Initializing,
    Ready,
    Error,
    Reset,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::NotConnected => "notConnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Initializing => "initializing",
            ConnectionStatus::Ready => "ready",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Reset => "reset",
        };
        f.write_str(s)
    }
}

/// A status transition together with the data that belongs to it.
///
/// `Ready` carries the connection id handed out by the subject's
/// acknowledgement; `Error` carries a reason and optional details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConnectionStatusChange {
    NotConnected,
    Connecting,
    Initializing,
    Ready {
        connection_id: String,
    },
    Error {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ConnectionStatusChange {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionStatusChange::NotConnected => ConnectionStatus::NotConnected,
            ConnectionStatusChange::Connecting => ConnectionStatus::Connecting,
            ConnectionStatusChange::Initializing => ConnectionStatus::Initializing,
            ConnectionStatusChange::Ready { .. } => ConnectionStatus::Ready,
            ConnectionStatusChange::Error { .. } => ConnectionStatus::Error,
            ConnectionStatusChange::Reset { .. } => ConnectionStatus::Reset,
        }
    }
}
