//! Subscription manager: the registry consulted by the proxy.
//!
//! Combines the handler set with handler ids and reports 0→1 and 1→0
//! transitions so the proxy can send exactly one wire `subscribe` and one
//! wire `unsubscribe` per topic.

use crate::handler_id_map::SubscriptionHandlerIdMap;
use crate::set::SubscriptionSet;
use framelink_core::{EmitReport, SubscriptionHandler, Topic, settle_all};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};
use uuid::Uuid;

/// Result of [`SubscriptionManager::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRegistration {
    pub handler_id: Uuid,
    /// True when this registration took the topic from zero handlers to one.
    pub topic_created: bool,
}

#[derive(Default)]
struct Registry {
    handlers: SubscriptionSet<SubscriptionHandler>,
    ids: SubscriptionHandlerIdMap<SubscriptionHandler>,
}

/// Thread-safe subscription registry.
#[derive(Default)]
pub struct SubscriptionManager {
    registry: Mutex<Registry>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Re-adding the same handler returns its
    /// existing id and leaves the registry unchanged.
    pub fn add(&self, topic: &Topic, handler: SubscriptionHandler) -> HandlerRegistration {
        let mut registry = self.lock();
        let topic_created = registry.handlers.is_empty(topic);
        let inserted = registry.handlers.add(topic, handler.clone());
        let handler_id = registry.ids.add(topic, handler);

        if inserted {
            debug!(%topic, %handler_id, topic_created, "Subscription added");
        } else {
            trace!(%topic, %handler_id, "Subscription already present");
        }

        HandlerRegistration {
            handler_id,
            topic_created: topic_created && inserted,
        }
    }

    pub fn get(&self, topic: &Topic) -> Vec<SubscriptionHandler> {
        self.lock().handlers.get(topic)
    }

    pub fn get_by_id(&self, topic: &Topic, handler_id: Uuid) -> Option<SubscriptionHandler> {
        self.lock().ids.get_handler(topic, handler_id)
    }

    /// Remove `handler` from `topic`. Returns true when the topic lost its
    /// last handler; removing an unknown handler is a no-op.
    pub fn delete(&self, topic: &Topic, handler: &SubscriptionHandler) -> bool {
        let mut registry = self.lock();
        if !registry.handlers.delete(topic, handler) {
            return false;
        }
        registry.ids.delete(topic, handler);
        let topic_removed = registry.handlers.is_empty(topic);
        debug!(%topic, topic_removed, "Subscription removed");
        topic_removed
    }

    pub fn size(&self, topic: &Topic) -> usize {
        self.lock().handlers.size(topic)
    }

    pub fn is_empty(&self, topic: &Topic) -> bool {
        self.lock().handlers.is_empty(topic)
    }

    pub fn get_all_subscriptions(&self) -> Vec<Topic> {
        self.lock().handlers.topics()
    }

    /// Deliver `data` to every handler of `topic`.
    ///
    /// Handlers are snapshotted now and run as independent tasks; the future
    /// resolves when all have settled. A failing handler is logged and does
    /// not affect its siblings.
    pub fn publish(&self, topic: &Topic, data: Value) -> BoxFuture<'static, EmitReport> {
        let handlers = self.get(topic);
        if handlers.is_empty() {
            debug!(%topic, "Publish with no subscribers");
        }
        Box::pin(settle_all(handlers, data, topic.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> SubscriptionHandler {
        SubscriptionHandler::from_fn(|_| Ok(()))
    }

    #[test]
    fn add_is_idempotent_per_handler() {
        let manager = SubscriptionManager::new();
        let topic = Topic::new("agent", "stateChange");
        let h = noop();

        let first = manager.add(&topic, h.clone());
        let second = manager.add(&topic, h.clone());

        assert_eq!(first.handler_id, second.handler_id);
        assert!(first.topic_created);
        assert!(!second.topic_created);
        assert_eq!(manager.size(&topic), 1);
    }

    #[test]
    fn only_first_handler_creates_topic() {
        let manager = SubscriptionManager::new();
        let topic = Topic::new("agent", "stateChange");

        assert!(manager.add(&topic, noop()).topic_created);
        assert!(!manager.add(&topic, noop()).topic_created);
        assert_eq!(manager.size(&topic), 2);
    }

    #[test]
    fn deleting_last_handler_removes_topic() {
        let manager = SubscriptionManager::new();
        let topic = Topic::new("agent", "stateChange");
        let a = noop();
        let b = noop();
        manager.add(&topic, a.clone());
        manager.add(&topic, b.clone());

        assert!(!manager.delete(&topic, &a));
        assert_eq!(manager.get_all_subscriptions(), vec![topic.clone()]);

        assert!(manager.delete(&topic, &b));
        assert!(manager.get_all_subscriptions().is_empty());
        assert!(manager.is_empty(&topic));
    }

    #[test]
    fn deleting_unrelated_handler_is_noop() {
        let manager = SubscriptionManager::new();
        let topic = Topic::new("agent", "stateChange");
        manager.add(&topic, noop());

        assert!(!manager.delete(&topic, &noop()));
        assert!(!manager.is_empty(&topic));
        assert_eq!(manager.size(&topic), 1);
    }

    #[test]
    fn get_by_id_finds_the_registered_handler() {
        let manager = SubscriptionManager::new();
        let topic = Topic::new("contact", "cleared").with_parameter("c-1");
        let h = noop();
        let registration = manager.add(&topic, h.clone());

        let found = manager.get_by_id(&topic, registration.handler_id).unwrap();
        assert!(framelink_core::HandlerIdentity::same_as(&found, &h));
        assert!(manager.get_by_id(&topic, Uuid::new_v4()).is_none());
        assert!(
            manager
                .get_by_id(&Topic::new("contact", "cleared"), registration.handler_id)
                .is_none()
        );
    }

    #[tokio::test]
    async fn publish_isolates_failing_handler() {
        let manager = SubscriptionManager::new();
        let topic = Topic::new("agent", "stateChange");
        let seen = Arc::new(AtomicUsize::new(0));

        manager.add(
            &topic,
            SubscriptionHandler::from_fn(|_| -> anyhow::Result<()> { panic!("h1 throws") }),
        );
        let counter = Arc::clone(&seen);
        manager.add(
            &topic,
            SubscriptionHandler::new(move |data: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(data["n"].as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let report = manager
            .publish(&topic, serde_json::json!({"n": 3}))
            .await;
        assert_eq!(report.invoked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_invokes_nothing() {
        let manager = SubscriptionManager::new();
        let report = manager
            .publish(&Topic::new("agent", "nothing"), Value::Null)
            .await;
        assert_eq!(report.invoked, 0);
    }
}
