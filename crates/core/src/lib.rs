//! # Framelink Core
//!
//! Wire types, emitters, and error definitions for the Framelink messaging
//! core. Framelink lets isolated execution contexts (an embedded app frame,
//! a shared background worker, a host workspace) exchange typed events and
//! requests over an arbitrary transport.
//!
//! ## Design Philosophy
//!
//! This crate owns the vocabulary every other crate speaks:
//! - Closed message families (`UpstreamMessage`, `DownstreamMessage`)
//! - Identity-comparable handlers and failure-isolated fan-out
//! - One error taxonomy shared by the registry, correlator, and channel router

pub mod error;
pub mod event;
pub mod message;
pub mod payload;
pub mod sanitize;
pub mod status;
pub mod topic;

// Re-export key types at crate root for ergonomics
pub use error::{ChannelError, Error, ProviderError, ResponseError, Result, TransportError};
pub use event::{
    AsyncEventEmitter, AsyncHandler, EmitReport, Emitter, EventEmitter, Handler, HandlerFuture,
    HandlerIdentity, settle_all,
};
pub use message::{
    AcknowledgeMessage, AcknowledgeStatus, ChildUpstreamMessage, DownstreamMessage, LogLevel,
    LogMessage, MessageOrigin, MetricMessage, RequestMessage, ResponseMessage, UpstreamError,
    UpstreamMessage,
};
pub use payload::to_payload;
pub use sanitize::sanitize_for_log;
pub use status::{ConnectionStatus, ConnectionStatusChange};
pub use topic::Topic;

/// Handler type used for published topic data.
pub type SubscriptionHandler = AsyncHandler<serde_json::Value>;
