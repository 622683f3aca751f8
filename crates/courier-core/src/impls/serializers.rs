//! Built-in serializers: `application/json` and `text/plain`.

use crate::domain::{CourierError, DEFAULT_CONTENT_TYPE};
use crate::ports::MessageSerializer;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &str {
        DEFAULT_CONTENT_TYPE
    }

    fn write(&self, message: &serde_json::Value) -> Result<Vec<u8>, CourierError> {
        Ok(serde_json::to_vec(message)?)
    }

    fn read(&self, bytes: &[u8]) -> Result<serde_json::Value, CourierError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Scalars only: strings are written verbatim, numbers and booleans as their
/// text form. Structured messages are rejected.
///
/// Reading always yields a JSON string. Whether `"42"` means a number is up to
/// the message type it is decoded into.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSerializer;

impl MessageSerializer for PlainTextSerializer {
    fn content_type(&self) -> &str {
        "text/plain"
    }

    fn write(&self, message: &serde_json::Value) -> Result<Vec<u8>, CourierError> {
        use serde_json::Value;
        match message {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Number(_) | Value::Bool(_) => Ok(message.to_string().into_bytes()),
            other => Err(CourierError::Serialization(format!(
                "text/plain can only carry scalars, got {other}"
            ))),
        }
    }

    fn read(&self, bytes: &[u8]) -> Result<serde_json::Value, CourierError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CourierError::Serialization(format!("text/plain is not utf-8: {e}")))?;
        Ok(serde_json::Value::String(text.to_string()))
    }
}
