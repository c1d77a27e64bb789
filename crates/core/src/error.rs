//! Error types for the Framelink messaging core.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error key carried by requests rejected because no response arrived in time.
pub const CLIENT_TIMEOUT_ERROR_KEY: &str = "clientTimeout";

/// Error key carried by requests whose pending entry vanished without an answer.
pub const REQUEST_DROPPED_ERROR_KEY: &str = "requestDropped";

/// The top-level error type for all Framelink operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Child channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Request errors ---
    #[error("Request error: {0}")]
    Response(#[from] ResponseError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Lifecycle ---
    #[error("Proxy already initialized")]
    AlreadyInitialized,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Channel already registered: {0}")]
    DuplicateConnection(String),

    #[error("No channel for connection: {0}")]
    NotFound(String),

    #[error("Channel {0} is not a linked channel")]
    NotLinked(String),

    #[error("Provider mismatch on {connection_id}: expected {expected}, got {actual:?}")]
    ProviderMismatch {
        connection_id: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Link closed for connection: {0}")]
    LinkClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Provider config is required")]
    MissingConfig,

    #[error("Proxy factory is required")]
    MissingProxyFactory,

    #[error("Global provider is already set")]
    GlobalAlreadySet,

    #[error("Invalid provider config: {0}")]
    InvalidConfig(String),
}

/// A structured failure for a single request, either reported by the subject
/// or produced locally (client timeout).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{namespace} request failed ({error_key}): {reason}")]
pub struct ResponseError {
    pub namespace: String,
    pub error_key: String,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

impl ResponseError {
    /// The error a caller sees when the subject never answered.
    pub fn client_timeout(namespace: &str, command: &str, request_data: Value, timeout_ms: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            error_key: CLIENT_TIMEOUT_ERROR_KEY.to_string(),
            reason: "Client Timeout".to_string(),
            details: serde_json::json!({
                "command": command,
                "requestData": request_data,
                "timeoutMs": timeout_ms,
            }),
        }
    }

    /// The pending entry was discarded (manager dropped) before resolution.
    pub fn dropped(namespace: &str, command: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            error_key: REQUEST_DROPPED_ERROR_KEY.to_string(),
            reason: "Request dropped before a response arrived".to_string(),
            details: serde_json::json!({ "command": command }),
        }
    }

    pub fn is_client_timeout(&self) -> bool {
        self.error_key == CLIENT_TIMEOUT_ERROR_KEY
    }
}
