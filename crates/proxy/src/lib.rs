//! The Framelink proxy engine.
//!
//! Owns the connection lifecycle, the queue-until-ready discipline and the
//! request/response correlator, and wires the subscription registry, the
//! health check and the child channel manager together behind one surface.

pub mod error_service;
pub mod logger;
pub mod module;
pub mod provider;
pub mod proxy;
pub mod request;
pub mod status;
pub mod transport;

pub use error_service::{
    ErrorService, LocalErrorService, ProxyError, UpstreamErrorService,
};
pub use logger::Logger;
pub use module::ModuleProxy;
pub use provider::{Provider, ProviderBuilder, ProxyFactory, global_provider, set_global_provider};
pub use proxy::{Proxy, SDK_VERSION};
pub use request::{DEFAULT_REQUEST_TIMEOUT, RequestManager};
pub use status::{ConnectionStatusHandler, ConnectionStatusManager};
pub use transport::{InboundSender, LinkTransport, Transport};
