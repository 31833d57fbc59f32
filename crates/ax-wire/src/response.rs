//! The single response envelope.
//!
//! Every IPC response has the shape `{ok: true, ...}` or
//! `{ok: false, error: <string>}`.

use serde_json::{json, Map, Value};

/// A response to one IPC request.
#[derive(Debug, Clone, PartialEq)]
pub struct IpcResponse {
    value: Value,
}

impl IpcResponse {
    /// A bare success.
    pub fn ok() -> Self {
        Self {
            value: json!({"ok": true}),
        }
    }

    /// A success carrying extra fields. `payload` must be a JSON object;
    /// its fields are merged beside `ok`. An `ok` key in the payload is
    /// overwritten.
    pub fn ok_with(payload: Value) -> Self {
        let mut map = match payload {
            Value::Object(m) => m,
            other => {
                let mut m = Map::new();
                m.insert("result".to_string(), other);
                m
            }
        };
        map.insert("ok".to_string(), Value::Bool(true));
        Self {
            value: Value::Object(map),
        }
    }

    /// A failure with a message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            value: json!({"ok": false, "error": message.into()}),
        }
    }

    /// Whether this response is a success.
    pub fn is_ok(&self) -> bool {
        self.value.get("ok").and_then(Value::as_bool).unwrap_or(false)
    }

    /// The error message, if any.
    pub fn error(&self) -> Option<&str> {
        self.value.get("error").and_then(Value::as_str)
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Serialize to bytes for framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.value).unwrap_or_else(|_| b"{\"ok\":false,\"error\":\"serialization failure\"}".to_vec())
    }

    /// Parse a response frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| format!("malformed response: {e}"))?;
        if !value.is_object() || value.get("ok").and_then(Value::as_bool).is_none() {
            return Err("response must be an object with a boolean 'ok'".into());
        }
        Ok(Self { value })
    }
}
