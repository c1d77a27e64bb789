//! Per-topic handler sets.

use crate::map::SubscriptionMap;
use framelink_core::{HandlerIdentity, Topic};

/// Handlers grouped by topic, deduplicated by identity.
#[derive(Debug)]
pub struct SubscriptionSet<H> {
    map: SubscriptionMap<Vec<H>>,
}

impl<H> Default for SubscriptionSet<H> {
    fn default() -> Self {
        Self {
            map: SubscriptionMap::new(),
        }
    }
}

impl<H: HandlerIdentity + Clone> SubscriptionSet<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` under `topic`. Returns `false` if it was already present.
    pub fn add(&mut self, topic: &Topic, handler: H) -> bool {
        let handlers = self.map.get_or_insert_with(topic, Vec::new);
        if handlers.iter().any(|h| h.same_as(&handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Remove `handler` from `topic`. The topic disappears with its last handler.
    pub fn delete(&mut self, topic: &Topic, handler: &H) -> bool {
        let Some(handlers) = self.map.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !h.same_as(handler));
        let removed = handlers.len() < before;
        if handlers.is_empty() {
            self.map.remove(topic);
        }
        removed
    }

    pub fn contains(&self, topic: &Topic, handler: &H) -> bool {
        self.map
            .get(topic)
            .is_some_and(|handlers| handlers.iter().any(|h| h.same_as(handler)))
    }

    pub fn get(&self, topic: &Topic) -> Vec<H> {
        self.map.get(topic).cloned().unwrap_or_default()
    }

    pub fn size(&self, topic: &Topic) -> usize {
        self.map.get(topic).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, topic: &Topic) -> bool {
        self.size(topic) == 0
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.map.topics()
    }
}
