use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One JSON message as carried on either leg.
///
/// The relay forwards most frames without looking past `type`, so a frame is
/// kept as the raw object rather than a typed event. Unknown fields and
/// unknown frame types survive the trip byte-for-byte in meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(Map<String, Value>);

impl Frame {
    /// # Errors
    /// Returns an error if `text` is not JSON or is not a JSON object.
    #[allow(clippy::result_large_err)]
    pub fn parse(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidFrame(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builds a frame from any typed event.
    ///
    /// # Errors
    /// Returns an error if the event does not serialize to a JSON object.
    #[allow(clippy::result_large_err)]
    pub fn from_event<T: Serialize>(event: &T) -> Result<Self> {
        match serde_json::to_value(event)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidFrame(format!(
                "event serialized to {}",
                json_kind(&other)
            ))),
        }
    }

    /// Decodes the frame into a typed view.
    ///
    /// # Errors
    /// Returns an error if the frame does not match `T`.
    #[allow(clippy::result_large_err)]
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// # Errors
    /// Returns an error if serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// The `type` discriminator, when present.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub const fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Frame {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_keeps_unknown_fields() {
        let frame = Frame::parse(r#"{"type":"x.custom","payload":{"a":1},"extra":true}"#).unwrap();
        assert_eq!(frame.kind(), Some("x.custom"));
        assert_eq!(
            frame.into_value(),
            json!({"type": "x.custom", "payload": {"a": 1}, "extra": true})
        );
    }

    #[test]
    fn parse_rejects_non_objects() {
        let err = Frame::parse("[1,2]").unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(msg) if msg.contains("array")));
        assert!(matches!(Frame::parse("not json"), Err(Error::Serialization(_))));
    }

    #[test]
    fn frame_without_type_has_no_kind() {
        let frame = Frame::parse(r#"{"audio":"AAAA"}"#).unwrap();
        assert_eq!(frame.kind(), None);
    }
}
