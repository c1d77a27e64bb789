//! Detached payload copies for data crossing the transport boundary.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

/// Serialize `data` into an owned JSON value.
///
/// Values that cannot be represented as JSON (non-string map keys, failing
/// `Serialize` impls) become a descriptive stub instead of an error.
pub fn to_payload<T: Serialize + ?Sized>(data: &T) -> Value {
    match serde_json::to_value(data) {
        Ok(value) => value,
        Err(e) => {
            let type_name = std::any::type_name::<T>();
            warn!(type_name, error = %e, "Payload could not be serialized, sending stub");
            json!({
                "unserializable": true,
                "typeName": type_name,
                "reason": e.to_string(),
            })
        }
    }
}
