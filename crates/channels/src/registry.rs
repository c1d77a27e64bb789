//! Channel manager: routes traffic between a parent proxy and its children.
//!
//! Every child connection is keyed by its connection id. Messages a child
//! sends are wrapped in `childUpstream` envelopes and handed to the parent's
//! upstream sink; `childDownstreamMessage` payloads from the host are
//! delivered to the matching child after the provider-id check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use framelink_core::error::ChannelError;
use framelink_core::message::{ChildUpstreamMessage, UpstreamMessage};
use framelink_core::sanitize_for_log;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::link::{ChannelTransport, LinkEndpoint, MessageSink};

/// Inner message announcing a freshly registered child.
pub const CHILD_CONNECTION_READY: &str = "childConnectionReady";

/// Where the manager sends wrapped child traffic (normally the parent proxy).
pub type UpstreamSink = Arc<dyn Fn(UpstreamMessage) + Send + Sync>;

type ChannelTable = Mutex<HashMap<String, ChannelEntry>>;

enum Route {
    Linked {
        to_child: mpsc::UnboundedSender<Value>,
        listener: JoinHandle<()>,
    },
    Direct {
        to_child: MessageSink,
    },
}

struct ChannelEntry {
    provider_id: Option<String>,
    route: Route,
}

/// Wraps child messages for one connection and forwards them upstream.
#[derive(Clone)]
struct Relay {
    connection_id: String,
    parent_provider_id: String,
    upstream: UpstreamSink,
    channels: Weak<ChannelTable>,
}

impl Relay {
    fn forward(&self, message: Value) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let source_provider_id = {
            let table = channels.lock().unwrap_or_else(PoisonError::into_inner);
            match table.get(&self.connection_id) {
                Some(entry) => entry.provider_id.clone(),
                None => {
                    warn!(
                        connection_id = %self.connection_id,
                        message = %sanitize_for_log(&message),
                        "Dropping message from closed child channel"
                    );
                    return;
                }
            }
        };

        (self.upstream)(UpstreamMessage::ChildUpstream(ChildUpstreamMessage {
            source_provider_id,
            parent_provider_id: self.parent_provider_id.clone(),
            connection_id: self.connection_id.clone(),
            message,
        }));
    }

    fn listen(self, mut rx: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                self.forward(message);
            }
            debug!(connection_id = %self.connection_id, "Child link closed by peer");
        })
    }
}

/// Registry of child channels owned by one proxy.
pub struct ChannelManager {
    parent_provider_id: String,
    upstream: UpstreamSink,
    channels: Arc<ChannelTable>,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("parent_provider_id", &self.parent_provider_id)
            .field("channels", &self.len())
            .finish()
    }
}

impl ChannelManager {
    pub fn new(parent_provider_id: impl Into<String>, upstream: UpstreamSink) -> Self {
        Self {
            parent_provider_id: parent_provider_id.into(),
            upstream,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelEntry>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn relay(&self, connection_id: &str) -> Relay {
        Relay {
            connection_id: connection_id.to_string(),
            parent_provider_id: self.parent_provider_id.clone(),
            upstream: self.upstream.clone(),
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Register a child channel and announce it upstream.
    ///
    /// A connection id can only be registered once; a second registration is
    /// rejected and the existing channel is left untouched.
    pub fn add_channel(
        &self,
        connection_id: &str,
        provider_id: Option<String>,
        transport: ChannelTransport,
    ) -> Result<(), ChannelError> {
        let kind = transport.kind();
        let install = {
            let mut table = self.table();
            if table.contains_key(connection_id) {
                error!(connection_id, "Channel already registered");
                return Err(ChannelError::DuplicateConnection(connection_id.to_string()));
            }

            let (route, install) = match transport {
                ChannelTransport::Linked(endpoint) => {
                    let (to_child, from_child) = endpoint.into_split();
                    let listener = self.relay(connection_id).listen(from_child);
                    (Route::Linked { to_child, listener }, None)
                }
                ChannelTransport::Direct(link) => (
                    Route::Direct {
                        to_child: link.to_child,
                    },
                    Some(link.install_upstream),
                ),
            };

            table.insert(
                connection_id.to_string(),
                ChannelEntry {
                    provider_id: provider_id.clone(),
                    route,
                },
            );
            install
        };

        if let Some(install) = install {
            let relay = self.relay(connection_id);
            install(Arc::new(move |message| relay.forward(message)));
        }

        info!(connection_id, kind, provider_id = ?provider_id, "Registered child channel");

        (self.upstream)(UpstreamMessage::ChildUpstream(ChildUpstreamMessage {
            source_provider_id: provider_id,
            parent_provider_id: self.parent_provider_id.clone(),
            connection_id: connection_id.to_string(),
            message: json!({ "type": CHILD_CONNECTION_READY }),
        }));
        Ok(())
    }

    /// Swap the endpoint of an existing linked channel.
    ///
    /// The old listener is stopped and the old child-side link is closed.
    /// When `provider_id` is given it replaces the recorded one.
    pub fn update_channel_port(
        &self,
        connection_id: &str,
        endpoint: LinkEndpoint,
        provider_id: Option<String>,
    ) -> Result<(), ChannelError> {
        let mut table = self.table();
        let Some(entry) = table.get_mut(connection_id) else {
            error!(connection_id, "Cannot update port of unknown channel");
            return Err(ChannelError::NotFound(connection_id.to_string()));
        };
        let Route::Linked { listener, .. } = &entry.route else {
            error!(connection_id, "Cannot update port of a direct channel");
            return Err(ChannelError::NotLinked(connection_id.to_string()));
        };
        listener.abort();

        let (to_child, from_child) = endpoint.into_split();
        let listener = self.relay(connection_id).listen(from_child);
        entry.route = Route::Linked { to_child, listener };
        if provider_id.is_some() {
            entry.provider_id = provider_id;
        }

        debug!(connection_id, provider_id = ?entry.provider_id, "Updated child channel port");
        Ok(())
    }

    /// Deliver a host message to a child.
    ///
    /// A channel with a recorded provider id only accepts messages that name
    /// that provider as their target. Legacy channels without one accept
    /// anything.
    pub fn handle_downstream_message(
        &self,
        connection_id: &str,
        message: Value,
        target_provider_id: Option<&str>,
    ) -> Result<(), ChannelError> {
        let table = self.table();
        let Some(entry) = table.get(connection_id) else {
            warn!(
                connection_id,
                message = %sanitize_for_log(&message),
                "No child channel for downstream message"
            );
            return Err(ChannelError::NotFound(connection_id.to_string()));
        };

        if let Some(expected) = &entry.provider_id {
            if target_provider_id != Some(expected.as_str()) {
                error!(
                    connection_id,
                    expected = %expected,
                    actual = ?target_provider_id,
                    "Provider mismatch, dropping downstream message"
                );
                return Err(ChannelError::ProviderMismatch {
                    connection_id: connection_id.to_string(),
                    expected: expected.clone(),
                    actual: target_provider_id.map(str::to_string),
                });
            }
        }

        let to_child = match &entry.route {
            Route::Linked { to_child, .. } => {
                return to_child.send(message).map_err(|_| {
                    warn!(connection_id, "Child link closed, dropping downstream message");
                    ChannelError::LinkClosed(connection_id.to_string())
                });
            }
            Route::Direct { to_child } => to_child.clone(),
        };
        drop(table);
        to_child(message);
        Ok(())
    }

    /// Tear down and forget a child channel.
    pub fn handle_close_message(&self, connection_id: &str) -> Result<(), ChannelError> {
        let Some(entry) = self.table().remove(connection_id) else {
            warn!(connection_id, "Close requested for unknown child channel");
            return Err(ChannelError::NotFound(connection_id.to_string()));
        };
        teardown(connection_id, entry);
        Ok(())
    }

    /// Close every channel. Used when the owning proxy shuts down.
    pub fn close_all(&self) {
        let drained: Vec<(String, ChannelEntry)> = self.table().drain().collect();
        for (connection_id, entry) in drained {
            teardown(&connection_id, entry);
        }
    }

    pub fn has_channel(&self, connection_id: &str) -> bool {
        self.table().contains_key(connection_id)
    }

    pub fn provider_id_of(&self, connection_id: &str) -> Option<String> {
        self.table()
            .get(connection_id)
            .and_then(|entry| entry.provider_id.clone())
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.table().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

fn teardown(connection_id: &str, entry: ChannelEntry) {
    match entry.route {
        // Dropping `to_child` closes the child's receiving side.
        Route::Linked { listener, .. } => listener.abort(),
        Route::Direct { .. } => {}
    }
    info!(connection_id, "Closed child channel");
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DirectLink;

    fn collecting_sink() -> (UpstreamSink, mpsc::UnboundedReceiver<UpstreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: UpstreamSink = Arc::new(move |msg| {
            let _ = tx.send(msg);
        });
        (sink, rx)
    }

    fn child_envelope(msg: UpstreamMessage) -> ChildUpstreamMessage {
        match msg {
            UpstreamMessage::ChildUpstream(inner) => inner,
            other => panic!("expected childUpstream, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn add_linked_channel_announces_ready() {
        let (sink, mut upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (parent_end, _child_end) = LinkEndpoint::pair();

        manager
            .add_channel("c1", Some("p1".into()), ChannelTransport::Linked(parent_end))
            .unwrap();

        let ready = child_envelope(upstream.recv().await.unwrap());
        assert_eq!(ready.connection_id, "c1");
        assert_eq!(ready.parent_provider_id, "parent");
        assert_eq!(ready.source_provider_id.as_deref(), Some("p1"));
        assert_eq!(ready.message, json!({"type": "childConnectionReady"}));
        assert!(manager.has_channel("c1"));
    }

    #[tokio::test]
    async fn child_messages_are_wrapped() {
        let (sink, mut upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (parent_end, child_end) = LinkEndpoint::pair();
        manager
            .add_channel("c1", Some("p1".into()), ChannelTransport::Linked(parent_end))
            .unwrap();
        let _ready = upstream.recv().await.unwrap();

        child_end.post(json!({"type": "log", "message": "hi"})).unwrap();

        let wrapped = child_envelope(upstream.recv().await.unwrap());
        assert_eq!(wrapped.connection_id, "c1");
        assert_eq!(wrapped.message["message"], "hi");
    }

    #[tokio::test]
    async fn duplicate_connection_rejected() {
        let (sink, _upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (a, _a_child) = LinkEndpoint::pair();
        let (b, _b_child) = LinkEndpoint::pair();

        manager.add_channel("c1", None, ChannelTransport::Linked(a)).unwrap();
        let err = manager
            .add_channel("c1", None, ChannelTransport::Linked(b))
            .unwrap_err();
        assert_eq!(err, ChannelError::DuplicateConnection("c1".into()));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn downstream_routing_checks_provider() {
        let (sink, _upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (parent_end, mut child_end) = LinkEndpoint::pair();
        manager
            .add_channel("c1", Some("p1".into()), ChannelTransport::Linked(parent_end))
            .unwrap();

        manager
            .handle_downstream_message("c1", json!({"n": 1}), Some("p1"))
            .unwrap();
        assert_eq!(child_end.recv().await, Some(json!({"n": 1})));

        let err = manager
            .handle_downstream_message("c1", json!({"n": 2}), Some("p2"))
            .unwrap_err();
        assert!(matches!(err, ChannelError::ProviderMismatch { .. }));
        assert_eq!(child_end.try_recv(), None);

        // No declared target: dropped.
        let err = manager
            .handle_downstream_message("c1", json!({"n": 3}), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::ProviderMismatch { actual: None, .. }
        ));
        assert_eq!(child_end.try_recv(), None);
    }

    #[tokio::test]
    async fn legacy_channel_skips_provider_check() {
        let (sink, _upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (parent_end, mut child_end) = LinkEndpoint::pair();
        manager
            .add_channel("legacy", None, ChannelTransport::Linked(parent_end))
            .unwrap();

        manager
            .handle_downstream_message("legacy", json!({"n": 1}), Some("anyone"))
            .unwrap();
        assert_eq!(child_end.recv().await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn unknown_channel_is_dropped() {
        let (sink, _upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let err = manager
            .handle_downstream_message("ghost", json!({"type": "publish"}), None)
            .unwrap_err();
        assert_eq!(err, ChannelError::NotFound("ghost".into()));
        assert!(manager.handle_close_message("ghost").is_err());
    }

    #[tokio::test]
    async fn close_linked_channel_closes_child_side() {
        let (sink, _upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (parent_end, mut child_end) = LinkEndpoint::pair();
        manager
            .add_channel("c1", None, ChannelTransport::Linked(parent_end))
            .unwrap();

        manager.handle_close_message("c1").unwrap();
        assert!(!manager.has_channel("c1"));
        assert_eq!(child_end.recv().await, None);
        assert!(manager.handle_downstream_message("c1", json!({}), None).is_err());
    }

    #[tokio::test]
    async fn direct_channel_round_trip() {
        let (sink, mut upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let child_upstream: Arc<Mutex<Option<MessageSink>>> = Arc::new(Mutex::new(None));
        let link = DirectLink {
            to_child: {
                let delivered = delivered.clone();
                Arc::new(move |msg| delivered.lock().unwrap().push(msg))
            },
            install_upstream: {
                let slot = child_upstream.clone();
                Box::new(move |push| *slot.lock().unwrap() = Some(push))
            },
        };
        manager
            .add_channel("d1", Some("p1".into()), ChannelTransport::Direct(link))
            .unwrap();
        let _ready = upstream.recv().await.unwrap();

        manager
            .handle_downstream_message("d1", json!({"n": 1}), Some("p1"))
            .unwrap();
        assert_eq!(*delivered.lock().unwrap(), vec![json!({"n": 1})]);

        let push = child_upstream.lock().unwrap().clone().unwrap();
        push(json!({"type": "log"}));
        let wrapped = child_envelope(upstream.recv().await.unwrap());
        assert_eq!(wrapped.connection_id, "d1");

        manager.handle_close_message("d1").unwrap();
        push(json!({"type": "log"}));
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_port_rewires_linked_channel() {
        let (sink, mut upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (old_parent, mut old_child) = LinkEndpoint::pair();
        manager
            .add_channel("c1", Some("p1".into()), ChannelTransport::Linked(old_parent))
            .unwrap();
        let _ready = upstream.recv().await.unwrap();

        let (new_parent, mut new_child) = LinkEndpoint::pair();
        manager
            .update_channel_port("c1", new_parent, Some("p2".into()))
            .unwrap();
        assert_eq!(manager.provider_id_of("c1").as_deref(), Some("p2"));
        assert_eq!(old_child.recv().await, None);

        manager
            .handle_downstream_message("c1", json!({"n": 1}), Some("p2"))
            .unwrap();
        assert_eq!(new_child.recv().await, Some(json!({"n": 1})));

        new_child.post(json!({"type": "metric"})).unwrap();
        let wrapped = child_envelope(upstream.recv().await.unwrap());
        assert_eq!(wrapped.source_provider_id.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn update_port_requires_linked_channel() {
        let (sink, _upstream) = collecting_sink();
        let manager = ChannelManager::new("parent", sink);
        let (endpoint, _peer) = LinkEndpoint::pair();
        assert!(matches!(
            manager.update_channel_port("ghost", endpoint, None),
            Err(ChannelError::NotFound(_))
        ));

        let link = DirectLink {
            to_child: Arc::new(|_| {}),
            install_upstream: Box::new(|_| {}),
        };
        manager
            .add_channel("d1", None, ChannelTransport::Direct(link))
            .unwrap();
        let (endpoint, _peer) = LinkEndpoint::pair();
        assert!(matches!(
            manager.update_channel_port("d1", endpoint, None),
            Err(ChannelError::NotLinked(_))
        ));
    }
}
