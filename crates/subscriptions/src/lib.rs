//! Hierarchical subscription registry for Framelink.
//!
//! Handler storage addressable by `(namespace, key, parameter?)`, with
//! identity-based deduplication and optional per-handler ids.

pub mod handler_id_map;
pub mod manager;
pub mod map;
pub mod set;

pub use handler_id_map::SubscriptionHandlerIdMap;
pub use manager::{HandlerRegistration, SubscriptionManager};
pub use map::SubscriptionMap;
pub use set::SubscriptionSet;
