//! Two-level topic storage.
//!
//! Topics without a parameter and topics with one live in separate buckets,
//! each split by namespace then key, so `{agent, stateChange}` and
//! `{agent, stateChange, c-1}` never share a slot.

use framelink_core::Topic;
use std::collections::HashMap;

type KeyMap<T> = HashMap<String, T>;

/// A map from [`Topic`] to a value, addressable by hierarchy.
#[derive(Debug)]
pub struct SubscriptionMap<T> {
    simple: HashMap<String, KeyMap<T>>,
    parameterized: HashMap<String, KeyMap<HashMap<String, T>>>,
}

impl<T> Default for SubscriptionMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SubscriptionMap<T> {
    pub fn new() -> Self {
        Self {
            simple: HashMap::new(),
            parameterized: HashMap::new(),
        }
    }

    pub fn get(&self, topic: &Topic) -> Option<&T> {
        match &topic.parameter {
            None => self.simple.get(&topic.namespace)?.get(&topic.key),
            Some(parameter) => self
                .parameterized
                .get(&topic.namespace)?
                .get(&topic.key)?
                .get(parameter),
        }
    }

    pub fn get_mut(&mut self, topic: &Topic) -> Option<&mut T> {
        match &topic.parameter {
            None => self.simple.get_mut(&topic.namespace)?.get_mut(&topic.key),
            Some(parameter) => self
                .parameterized
                .get_mut(&topic.namespace)?
                .get_mut(&topic.key)?
                .get_mut(parameter),
        }
    }

    /// Return the value for `topic`, inserting `init()` first if absent.
    pub fn get_or_insert_with(&mut self, topic: &Topic, init: impl FnOnce() -> T) -> &mut T {
        match &topic.parameter {
            None => self
                .simple
                .entry(topic.namespace.clone())
                .or_default()
                .entry(topic.key.clone())
                .or_insert_with(init),
            Some(parameter) => self
                .parameterized
                .entry(topic.namespace.clone())
                .or_default()
                .entry(topic.key.clone())
                .or_default()
                .entry(parameter.clone())
                .or_insert_with(init),
        }
    }

    /// Remove `topic`, pruning any namespace/key level left empty.
    pub fn remove(&mut self, topic: &Topic) -> Option<T> {
        match &topic.parameter {
            None => {
                let keys = self.simple.get_mut(&topic.namespace)?;
                let removed = keys.remove(&topic.key);
                if keys.is_empty() {
                    self.simple.remove(&topic.namespace);
                }
                removed
            }
            Some(parameter) => {
                let keys = self.parameterized.get_mut(&topic.namespace)?;
                let params = keys.get_mut(&topic.key)?;
                let removed = params.remove(parameter);
                if params.is_empty() {
                    keys.remove(&topic.key);
                }
                if keys.is_empty() {
                    self.parameterized.remove(&topic.namespace);
                }
                removed
            }
        }
    }

    /// Every topic currently holding a value.
    pub fn topics(&self) -> Vec<Topic> {
        let simple = self.simple.iter().flat_map(|(namespace, keys)| {
            keys.keys().map(move |key| Topic::new(namespace.clone(), key.clone()))
        });
        let parameterized = self.parameterized.iter().flat_map(|(namespace, keys)| {
            keys.iter().flat_map(move |(key, params)| {
                params.keys().map(move |parameter| {
                    Topic::new(namespace.clone(), key.clone()).with_parameter(parameter.clone())
                })
            })
        });
        simple.chain(parameterized).collect()
    }

    pub fn len(&self) -> usize {
        let simple: usize = self.simple.values().map(HashMap::len).sum();
        let parameterized: usize = self
            .parameterized
            .values()
            .flat_map(HashMap::values)
            .map(HashMap::len)
            .sum();
        simple + parameterized
    }

    pub fn is_empty(&self) -> bool {
        self.simple.is_empty() && self.parameterized.is_empty()
    }
}
