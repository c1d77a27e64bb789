//! Log sanitization for routed messages.
//!
//! Routed child messages may carry customer data in their payloads. Before a
//! routed message is written to any log it passes through [`sanitize_for_log`],
//! which strips bulk payload data while keeping enough to diagnose routing.

use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("message is not an object")]
    NotAnObject,

    #[error("message has no string `type` field")]
    MissingType,
}

/// Strip payload data from a routed message.
///
/// * `acknowledge`, `error`, `childConnectionClose` and `closeChannel` pass through.
/// * `publish` loses `data`.
/// * `response` loses `data` on success; on error every `details` field
///   except `command` is removed.
/// * Other types pass through unchanged.
pub fn try_sanitize(message: &Value) -> Result<Value, SanitizeError> {
    let object = message.as_object().ok_or(SanitizeError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SanitizeError::MissingType)?;

    match kind {
        "publish" => {
            let mut clean = object.clone();
            clean.remove("data");
            Ok(Value::Object(clean))
        }
        "response" => {
            let mut clean = object.clone();
            let is_error = object.get("isError").and_then(Value::as_bool).unwrap_or(false);
            if is_error {
                if let Some(details) = clean.get_mut("details") {
                    *details = keep_command_only(details);
                }
            } else {
                clean.remove("data");
            }
            Ok(Value::Object(clean))
        }
        _ => Ok(message.clone()),
    }
}

fn keep_command_only(details: &Value) -> Value {
    let mut kept = Map::new();
    if let Some(command) = details.get("command") {
        kept.insert("command".into(), command.clone());
    }
    Value::Object(kept)
}

/// Infallible wrapper around [`try_sanitize`] for use inside log statements.
pub fn sanitize_for_log(message: &Value) -> Value {
    match try_sanitize(message) {
        Ok(clean) => clean,
        Err(e) => json!({
            "sanitizeError": format!("Unable to sanitize message: {e}"),
            "rawMessage": message,
        }),
    }
}
