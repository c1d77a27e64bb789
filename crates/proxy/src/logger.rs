//! Source-scoped logger that writes locally and forwards upstream.

use framelink_core::{LogLevel, LogMessage, to_payload};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::proxy::Proxy;

/// Obtained from [`Proxy::logger`].
///
/// Every entry goes to `tracing`; entries at or above the configured
/// remote level are also sent to the subject as `log` messages.
#[derive(Debug, Clone)]
pub struct Logger {
    proxy: Proxy,
    source: String,
    logger_id: String,
    min_remote_level: LogLevel,
    context: Map<String, Value>,
}

impl Logger {
    pub(crate) fn new(proxy: Proxy, source: String, min_remote_level: LogLevel) -> Self {
        Self {
            proxy,
            source,
            logger_id: Uuid::new_v4().to_string(),
            min_remote_level,
            context: Map::new(),
        }
    }

    /// Attach a context key to every entry from this logger.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_min_remote_level(mut self, level: LogLevel) -> Self {
        self.min_remote_level = level;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn logger_id(&self) -> &str {
        &self.logger_id
    }

    pub fn trace(&self, message: &str) {
        self.write(LogLevel::Trace, message, None);
    }

    pub fn debug(&self, message: &str) {
        self.write(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.write(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.write(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: &str) {
        self.write(LogLevel::Error, message, None);
    }

    /// Log with a payload. The payload is copied before it leaves.
    pub fn log_with<T: Serialize + ?Sized>(&self, level: LogLevel, message: &str, data: &T) {
        self.write(level, message, Some(to_payload(data)));
    }

    fn write(&self, level: LogLevel, message: &str, data: Option<Value>) {
        let source = self.source.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(source, "{message}"),
            LogLevel::Debug => tracing::debug!(source, "{message}"),
            LogLevel::Info => tracing::info!(source, "{message}"),
            LogLevel::Warn => tracing::warn!(source, "{message}"),
            LogLevel::Error => tracing::error!(source, "{message}"),
        }

        if level < self.min_remote_level {
            return;
        }
        self.proxy.send_log_message(LogMessage {
            level,
            source: self.source.clone(),
            time: chrono::Utc::now(),
            message: message.to_string(),
            logger_id: self.logger_id.clone(),
            data,
            context: self.context.clone(),
        });
    }
}
