//! Provider: the owning participant and its lazily created proxy.
//!
//! A provider is built from a validated config and a proxy factory. The
//! proxy is only created on first use. One provider per process may be
//! registered as the global default; that slot is set once.

use std::sync::{Arc, OnceLock};

use framelink_config::FramelinkConfig;
use framelink_core::ProviderError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::proxy::Proxy;

/// Creates the proxy for a provider from its config.
pub type ProxyFactory = Arc<dyn Fn(&FramelinkConfig) -> Proxy + Send + Sync>;

static GLOBAL_PROVIDER: OnceLock<Arc<Provider>> = OnceLock::new();

pub struct Provider {
    config: FramelinkConfig,
    factory: ProxyFactory,
    proxy: OnceLock<Proxy>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("provider_id", &self.provider_id())
            .field("name", &self.config.provider.name)
            .field("proxy_created", &self.proxy.get().is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct ProviderBuilder {
    config: Option<FramelinkConfig>,
    factory: Option<ProxyFactory>,
}

impl ProviderBuilder {
    pub fn config(mut self, config: FramelinkConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn proxy_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&FramelinkConfig) -> Proxy + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Fails when the config or the factory is missing, or the config is invalid.
    ///
    /// A config without a provider id gets a generated one, so the id is
    /// stable for the life of the provider.
    pub fn build(self) -> Result<Provider, ProviderError> {
        let mut config = self.config.ok_or(ProviderError::MissingConfig)?;
        let factory = self.factory.ok_or(ProviderError::MissingProxyFactory)?;
        config
            .validate()
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;

        if config.provider.id.is_none() {
            config.provider.id = Some(Uuid::new_v4().to_string());
        }
        debug!(provider_id = ?config.provider.id, name = %config.provider.name, "Provider built");

        Ok(Provider {
            config,
            factory,
            proxy: OnceLock::new(),
        })
    }
}

impl Provider {
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    pub fn provider_id(&self) -> &str {
        self.config.provider.id.as_deref().unwrap_or_default()
    }

    pub fn config(&self) -> &FramelinkConfig {
        &self.config
    }

    /// The provider's proxy, created by the factory on first call.
    pub fn get_proxy(&self) -> Proxy {
        self.proxy
            .get_or_init(|| {
                info!(provider_id = %self.provider_id(), "Creating proxy");
                (self.factory)(&self.config)
            })
            .clone()
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy.get().is_some()
    }
}

/// Register `provider` as the process-wide default. Succeeds only once.
pub fn set_global_provider(provider: Arc<Provider>) -> Result<(), ProviderError> {
    GLOBAL_PROVIDER
        .set(provider)
        .map_err(|_| ProviderError::GlobalAlreadySet)?;
    info!("Global provider set");
    Ok(())
}

pub fn global_provider() -> Option<Arc<Provider>> {
    GLOBAL_PROVIDER.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InboundSender, Transport};
    use async_trait::async_trait;
    use framelink_core::{TransportError, UpstreamMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    fn null_proxy(config: &FramelinkConfig) -> Proxy {
        Proxy::new(Arc::new(NullTransport), config.clone())
    }

    #[test]
    fn missing_config_is_rejected() {
        let err = Provider::builder().proxy_factory(null_proxy).build().unwrap_err();
        assert_eq!(err, ProviderError::MissingConfig);
    }

    #[test]
    fn missing_factory_is_rejected() {
        let err = Provider::builder()
            .config(FramelinkConfig::default())
            .build()
            .unwrap_err();
        assert_eq!(err, ProviderError::MissingProxyFactory);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = FramelinkConfig::default();
        config.proxy.health_check_interval_ms = 10;
        let err = Provider::builder()
            .config(config)
            .proxy_factory(null_proxy)
            .build()
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }

    #[test]
    fn proxy_is_created_once_and_lazily() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let provider = Provider::builder()
            .config(FramelinkConfig::default())
            .proxy_factory(move |config| {
                counter.fetch_add(1, Ordering::SeqCst);
                null_proxy(config)
            })
            .build()
            .unwrap();

        assert!(!provider.has_proxy());
        let first = provider.get_proxy();
        let second = provider.get_proxy();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(first.provider_id(), second.provider_id());
        assert_eq!(first.provider_id(), provider.provider_id());
    }
}
