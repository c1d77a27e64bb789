//! Error services: guaranteed logging plus handler fan-out.
//!
//! Two instances live on every proxy: one for failures detected locally
//! (handshake, transport send) and one for `error` messages reported by
//! the subject.

use framelink_core::{EmitReport, Emitter, Handler, UpstreamError};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// A failure detected by the proxy itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyError {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ProxyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{} ({details})", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

pub struct ErrorService<E> {
    source: &'static str,
    emitter: Emitter<E>,
}

impl<E: std::fmt::Display> ErrorService<E> {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            emitter: Emitter::new(source),
        }
    }

    /// Log `err`, then hand it to every registered handler.
    ///
    /// The log line is written even when no handler is registered.
    pub fn handle_error(&self, err: E) -> EmitReport {
        error!(source = self.source, error = %err, "Proxy error");
        self.emitter.emit(&err)
    }

    pub fn on_error(&self, handler: Handler<E>) {
        self.emitter.on(handler);
    }

    pub fn off_error(&self, handler: &Handler<E>) -> bool {
        self.emitter.off(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.emitter.len()
    }
}

/// Failures the proxy detects locally.
pub type LocalErrorService = ErrorService<ProxyError>;

/// Errors reported by the subject through `error` messages.
pub type UpstreamErrorService = ErrorService<UpstreamError>;
