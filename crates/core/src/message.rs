//! Wire messages exchanged between a proxy and its subject.
//!
//! Every message carries a `type` discriminator. Upstream messages travel
//! from the core to the subject, downstream messages travel back. Both
//! families are closed sum types; anything the core cannot decode is
//! handled by the caller as a protocol anomaly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ResponseError;
use crate::topic::Topic;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

/// Who issued a request or heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOrigin {
    pub provider_id: String,
    pub transport: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    pub level: LogLevel,
    pub source: String,
    pub time: DateTime<Utc>,
    pub message: String,
    pub logger_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMessage {
    pub namespace: String,
    pub metric_name: String,
    pub unit: String,
    pub value: f64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_dimensions: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub namespace: String,
    pub command: String,
    pub request_id: String,
    #[serde(default)]
    pub data: Value,
    pub message_origin: MessageOrigin,
}

/// A message from a nested child, wrapped for delivery to the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildUpstreamMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_provider_id: Option<String>,
    pub parent_provider_id: String,
    pub connection_id: String,
    pub message: Value,
}

/// Messages sent from the core to the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UpstreamMessage {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    Log(LogMessage),
    Metric(MetricMessage),
    Request(RequestMessage),
    HealthCheck { message_origin: MessageOrigin },
    CloseChannel,
    ChildUpstream(ChildUpstreamMessage),
}

impl UpstreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamMessage::Subscribe { .. } => "subscribe",
            UpstreamMessage::Unsubscribe { .. } => "unsubscribe",
            UpstreamMessage::Log(_) => "log",
            UpstreamMessage::Metric(_) => "metric",
            UpstreamMessage::Request(_) => "request",
            UpstreamMessage::HealthCheck { .. } => "healthCheck",
            UpstreamMessage::CloseChannel => "closeChannel",
            UpstreamMessage::ChildUpstream(_) => "childUpstream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeStatus {
    pub initialized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeMessage {
    pub connection_id: String,
    pub status: AcknowledgeStatus,
    /// Overrides the locally configured heartbeat interval when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
}

/// The subject's answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    pub request_id: String,
    pub namespace: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ResponseMessage {
    pub fn success(request_id: impl Into<String>, namespace: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            namespace: namespace.into(),
            is_error: false,
            data: Some(data),
            error_key: None,
            reason: None,
            details: None,
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        namespace: impl Into<String>,
        error_key: impl Into<String>,
        reason: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            namespace: namespace.into(),
            is_error: true,
            data: None,
            error_key: Some(error_key.into()),
            reason: Some(reason.into()),
            details: Some(details),
        }
    }

    /// Resolve to the response data, or the formatted error when `is_error` is set.
    pub fn into_result(self) -> Result<Value, ResponseError> {
        if !self.is_error {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        Err(ResponseError {
            namespace: self.namespace,
            error_key: self.error_key.unwrap_or_else(|| "unknown".into()),
            reason: self.reason.unwrap_or_default(),
            details: self.details.unwrap_or(Value::Null),
        })
    }
}

/// An error reported by the subject itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamError {
    pub error_key: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_key, self.reason)
    }
}

/// Messages sent from the subject to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DownstreamMessage {
    Acknowledge(AcknowledgeMessage),
    Publish {
        topic: Topic,
        #[serde(default)]
        data: Value,
    },
    Response(ResponseMessage),
    HealthCheckResponse { time: i64, counter: u64 },
    ChildDownstreamMessage {
        connection_id: String,
        #[serde(default)]
        target_provider_id: Option<String>,
        message: Value,
    },
    ChildConnectionClose { connection_id: String },
    Error(UpstreamError),
}

impl DownstreamMessage {
    /// Every `type` value this family understands.
    pub const TYPES: &'static [&'static str] = &[
        "acknowledge",
        "publish",
        "response",
        "healthCheckResponse",
        "childDownstreamMessage",
        "childConnectionClose",
        "error",
    ];

    pub fn is_known_type(kind: &str) -> bool {
        Self::TYPES.contains(&kind)
    }
}
