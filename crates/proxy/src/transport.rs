//! Transport trait: the abstraction over whatever carries wire messages.
//!
//! The proxy never opens a channel itself. A transport performs the
//! handshake, pushes inbound JSON into the sender it is given, and sends
//! upstream messages on request.

use async_trait::async_trait;
use framelink_channels::LinkEndpoint;
use framelink_core::error::TransportError;
use framelink_core::message::UpstreamMessage;
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Where a transport delivers raw inbound messages.
pub type InboundSender = mpsc::UnboundedSender<Value>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name, reported in `messageOrigin.transport`.
    fn name(&self) -> &str;

    /// Perform the handshake and start forwarding inbound messages.
    ///
    /// Called once per proxy. Returning `Ok` does not mean the subject is
    /// ready; readiness arrives as an `acknowledge` message.
    async fn connect(&self, inbound: InboundSender) -> Result<(), TransportError>;

    /// Send one message. Only called once the connection is established.
    fn send(&self, message: &UpstreamMessage) -> Result<(), TransportError>;

    /// Ambient context attached to every outbound log entry.
    fn log_context(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Transport over one end of an in-process link.
///
/// Used for nested contexts: the parent registers the peer endpoint as a
/// linked child channel and this side talks to it like any other subject.
pub struct LinkTransport {
    name: String,
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    context: Map<String, Value>,
}

impl LinkTransport {
    pub fn new(name: impl Into<String>, endpoint: LinkEndpoint) -> Self {
        let (outbound, inbound) = endpoint.into_split();
        Self {
            name: name.into(),
            outbound,
            inbound: Mutex::new(Some(inbound)),
            context: Map::new(),
        }
    }

    /// Add a key to the ambient log context.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

#[async_trait]
impl Transport for LinkTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, inbound: InboundSender) -> Result<(), TransportError> {
        let mut rx = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TransportError::HandshakeFailed("link already connected".into()))?;

        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            debug!(transport = %name, "Link transport stopped");
        });
        Ok(())
    }

    fn send(&self, message: &UpstreamMessage) -> Result<(), TransportError> {
        let value = serde_json::to_value(message)
            .map_err(|e| TransportError::SendFailed(format!("encode {}: {e}", message.kind())))?;
        self.outbound.send(value).map_err(|_| TransportError::Closed)
    }

    fn log_context(&self) -> Map<String, Value> {
        self.context.clone()
    }
}
