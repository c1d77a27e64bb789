//! Shared fixtures for proxy integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use framelink_config::FramelinkConfig;
use framelink_core::{TransportError, UpstreamMessage};
use framelink_proxy::{InboundSender, Proxy, Transport};
use serde_json::{Value, json};

// ── Mock Transport ───────────────────────────────────────────────────────

/// Records every message the proxy sends; the test plays the subject by
/// pushing inbound messages.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<UpstreamMessage>>,
    inbound: Mutex<Option<InboundSender>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, message: Value) {
        let inbound = self.inbound.lock().unwrap();
        inbound
            .as_ref()
            .expect("proxy not initialized")
            .send(message)
            .unwrap();
    }

    pub fn acknowledge(&self, connection_id: &str) {
        self.push(json!({
            "type": "acknowledge",
            "connectionId": connection_id,
            "status": {"initialized": true}
        }));
    }

    pub fn sent(&self) -> Vec<UpstreamMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(UpstreamMessage::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    /// The most recent `request` message.
    pub fn last_request_id(&self) -> Option<String> {
        self.sent().into_iter().rev().find_map(|m| match m {
            UpstreamMessage::Request(request) => Some(request.request_id),
            _ => None,
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, inbound: InboundSender) -> Result<(), TransportError> {
        *self.inbound.lock().unwrap() = Some(inbound);
        Ok(())
    }

    fn send(&self, message: &UpstreamMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

pub fn proxy_over(transport: &Arc<MockTransport>) -> Proxy {
    Proxy::new(transport.clone(), FramelinkConfig::default())
}

pub fn proxy_with_config(transport: &Arc<MockTransport>, config: FramelinkConfig) -> Proxy {
    Proxy::new(transport.clone(), config)
}

/// Let the dispatcher and spawned handler tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
