//! Topics: addressable event streams.

use serde::{Deserialize, Serialize};

/// Identifies a subscribable event stream.
///
/// `namespace` groups by domain module, `key` names the event kind and
/// `parameter` optionally scopes the stream to one instance. A topic without
/// a parameter is a different address from every topic that has one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub namespace: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl Topic {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            parameter: None,
        }
    }

    /// Scope the topic to a single instance (e.g. one conversation id).
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parameter {
            Some(parameter) => write!(f, "{}/{}/{}", self.namespace, self.key, parameter),
            None => write!(f, "{}/{}", self.namespace, self.key),
        }
    }
}
