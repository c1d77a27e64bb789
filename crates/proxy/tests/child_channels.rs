//! Nested contexts: a parent proxy routing for a child proxy over a link.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{MockTransport, proxy_over, settle};
use framelink_channels::{CHILD_CONNECTION_READY, ChannelTransport, LinkEndpoint};
use framelink_config::FramelinkConfig;
use framelink_core::{ConnectionStatus, SubscriptionHandler, Topic, UpstreamMessage};
use framelink_proxy::{LinkTransport, Proxy};
use serde_json::{Value, json};

const CHILD_PROVIDER: &str = "0b6a4c1e-8a53-4d5c-9a77-1f0e7c2d9b10";

struct Nested {
    host: Arc<MockTransport>,
    parent: Proxy,
    child: Proxy,
}

async fn nested() -> Nested {
    let host = MockTransport::new();
    let parent = proxy_over(&host);
    parent.init().await.unwrap();
    host.acknowledge("parent-conn");
    settle().await;

    let (child_end, parent_end) = LinkEndpoint::pair();
    parent
        .add_child_channel(
            "child-1",
            Some(CHILD_PROVIDER.into()),
            ChannelTransport::Linked(parent_end),
        )
        .unwrap();

    let mut config = FramelinkConfig::default();
    config.provider.id = Some(CHILD_PROVIDER.into());
    let child = Proxy::new(Arc::new(LinkTransport::new("link", child_end)), config);
    child.init().await.unwrap();

    Nested { host, parent, child }
}

fn child_envelopes(host: &MockTransport) -> Vec<Value> {
    host.sent()
        .into_iter()
        .filter_map(|m| match m {
            UpstreamMessage::ChildUpstream(envelope) => {
                assert_eq!(envelope.connection_id, "child-1");
                Some(envelope.message)
            }
            _ => None,
        })
        .collect()
}

fn downstream(target: Option<&str>, message: Value) -> Value {
    let mut envelope = json!({
        "type": "childDownstreamMessage",
        "connectionId": "child-1",
        "message": message,
    });
    if let Some(target) = target {
        envelope["targetProviderId"] = json!(target);
    }
    envelope
}

#[tokio::test]
async fn child_traffic_is_relayed_through_parent() {
    let Nested { host, parent, child } = nested().await;

    let envelopes = child_envelopes(&host);
    assert_eq!(envelopes, vec![json!({"type": CHILD_CONNECTION_READY})]);

    child.subscribe(
        Topic::new("agent", "stateChange"),
        SubscriptionHandler::from_fn(|_| Ok(())),
    );
    settle().await;
    assert_eq!(child_envelopes(&host).len(), 1, "child must queue until acknowledged");

    host.push(downstream(
        Some(CHILD_PROVIDER),
        json!({"type": "acknowledge", "connectionId": "child-1", "status": {"initialized": true}}),
    ));
    settle().await;

    assert_eq!(child.connection_status(), ConnectionStatus::Ready);
    let envelopes = child_envelopes(&host);
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[1]["type"], "subscribe");
    assert_eq!(envelopes[1]["topic"]["namespace"], "agent");
    assert!(parent.channels().has_channel("child-1"));
}

#[tokio::test]
async fn spoofed_target_provider_is_not_delivered() {
    let Nested { host, child, .. } = nested().await;
    host.push(downstream(
        Some(CHILD_PROVIDER),
        json!({"type": "acknowledge", "connectionId": "child-1", "status": {"initialized": true}}),
    ));
    settle().await;

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    child.subscribe(
        Topic::new("agent", "stateChange"),
        SubscriptionHandler::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    let publish = json!({
        "type": "publish",
        "topic": {"namespace": "agent", "key": "stateChange"},
        "data": {"state": "busy"}
    });

    host.push(downstream(Some("someone-else"), publish.clone()));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    host.push(downstream(None, publish.clone()));
    settle().await;
    assert_eq!(
        hits.load(Ordering::SeqCst),
        0,
        "untargeted message must not reach a recorded provider"
    );

    host.push(downstream(Some(CHILD_PROVIDER), publish));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_removes_channel_and_later_messages_are_dropped() {
    let Nested { host, parent, child } = nested().await;

    host.push(json!({"type": "childConnectionClose", "connectionId": "child-1"}));
    settle().await;
    assert!(!parent.channels().has_channel("child-1"));

    host.push(downstream(
        Some(CHILD_PROVIDER),
        json!({"type": "acknowledge", "connectionId": "child-1", "status": {"initialized": true}}),
    ));
    settle().await;
    assert_ne!(child.connection_status(), ConnectionStatus::Ready);
}

#[tokio::test]
async fn duplicate_child_connection_is_rejected() {
    let Nested { parent, .. } = nested().await;
    let (_other_child, other_parent) = LinkEndpoint::pair();
    assert!(
        parent
            .add_child_channel("child-1", None, ChannelTransport::Linked(other_parent))
            .is_err()
    );
    assert_eq!(parent.channels().len(), 1);
}
