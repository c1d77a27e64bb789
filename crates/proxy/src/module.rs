//! Module proxy: a namespace-scoped view over the engine.

use std::time::Duration;

use framelink_core::{ResponseError, SubscriptionHandler, Topic};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::proxy::Proxy;

/// Exposes `request`, `subscribe` and `unsubscribe` without repeating the
/// namespace. Domain clients hold one of these per module.
#[derive(Debug, Clone)]
pub struct ModuleProxy {
    proxy: Proxy,
    namespace: String,
}

impl ModuleProxy {
    pub(crate) fn new(proxy: Proxy, namespace: String) -> Self {
        Self { proxy, namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn topic(&self, key: &str, parameter: Option<&str>) -> Topic {
        let topic = Topic::new(self.namespace.clone(), key);
        match parameter {
            Some(parameter) => topic.with_parameter(parameter),
            None => topic,
        }
    }

    pub fn request<T: Serialize + ?Sized>(
        &self,
        command: &str,
        data: &T,
    ) -> BoxFuture<'static, Result<Value, ResponseError>> {
        self.proxy.request(&self.namespace, command, data)
    }

    pub fn request_with_timeout<T: Serialize + ?Sized>(
        &self,
        command: &str,
        data: &T,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Value, ResponseError>> {
        self.proxy
            .request_with_timeout(&self.namespace, command, data, timeout)
    }

    pub fn subscribe(
        &self,
        key: &str,
        parameter: Option<&str>,
        handler: SubscriptionHandler,
    ) -> Uuid {
        self.proxy.subscribe(self.topic(key, parameter), handler)
    }

    pub fn unsubscribe(&self, key: &str, parameter: Option<&str>, handler: &SubscriptionHandler) {
        self.proxy.unsubscribe(&self.topic(key, parameter), handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InboundSender, Transport};
    use async_trait::async_trait;
    use framelink_config::FramelinkConfig;
    use framelink_core::{TransportError, UpstreamMessage};
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        fn name(&self) -> &str {
            "null"
        }

        async fn connect(&self, _inbound: InboundSender) -> Result<(), TransportError> {
            Ok(())
        }

        fn send(&self, _message: &UpstreamMessage) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn topics_carry_the_module_namespace() {
        let proxy = Proxy::new(Arc::new(NullTransport), FramelinkConfig::default());
        let agent = proxy.module("agent");

        assert_eq!(agent.namespace(), "agent");
        assert_eq!(agent.topic("stateChange", None), Topic::new("agent", "stateChange"));
        assert_eq!(
            agent.topic("stateChange", Some("c-1")),
            Topic::new("agent", "stateChange").with_parameter("c-1")
        );
    }

    #[test]
    fn module_subscriptions_land_in_the_shared_registry() {
        let proxy = Proxy::new(Arc::new(NullTransport), FramelinkConfig::default());
        let contact = proxy.module("contact");
        let handler = SubscriptionHandler::from_fn(|_| Ok(()));

        let id = contact.subscribe("onConnected", None, handler.clone());
        assert_eq!(contact.subscribe("onConnected", None, handler.clone()), id);
        assert_eq!(
            proxy.subscriptions().size(&Topic::new("contact", "onConnected")),
            1
        );

        contact.unsubscribe("onConnected", None, &handler);
        assert!(proxy.subscriptions().get_all_subscriptions().is_empty());
    }
}
