//! Handler ids for protocols that address a single handler.

use crate::map::SubscriptionMap;
use framelink_core::{HandlerIdentity, Topic};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct IdEntry<H> {
    id: Uuid,
    handler: H,
}

/// Assigns a stable UUID to each (topic, handler) registration.
#[derive(Debug)]
pub struct SubscriptionHandlerIdMap<H> {
    map: SubscriptionMap<Vec<IdEntry<H>>>,
}

impl<H> Default for SubscriptionHandlerIdMap<H> {
    fn default() -> Self {
        Self {
            map: SubscriptionMap::new(),
        }
    }
}

impl<H: HandlerIdentity + Clone> SubscriptionHandlerIdMap<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id already assigned to `handler`, or assign a fresh one.
    pub fn add(&mut self, topic: &Topic, handler: H) -> Uuid {
        let entries = self.map.get_or_insert_with(topic, Vec::new);
        if let Some(existing) = entries.iter().find(|e| e.handler.same_as(&handler)) {
            return existing.id;
        }
        let id = Uuid::new_v4();
        entries.push(IdEntry { id, handler });
        id
    }

    pub fn get_id(&self, topic: &Topic, handler: &H) -> Option<Uuid> {
        self.map
            .get(topic)?
            .iter()
            .find(|e| e.handler.same_as(handler))
            .map(|e| e.id)
    }

    pub fn get_handler(&self, topic: &Topic, id: Uuid) -> Option<H> {
        self.map
            .get(topic)?
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.handler.clone())
    }

    /// Forget `handler`; returns the id it held.
    pub fn delete(&mut self, topic: &Topic, handler: &H) -> Option<Uuid> {
        let entries = self.map.get_mut(topic)?;
        let position = entries.iter().position(|e| e.handler.same_as(handler));
        let removed = position.map(|i| entries.remove(i).id);
        if entries.is_empty() {
            self.map.remove(topic);
        }
        removed
    }
}
