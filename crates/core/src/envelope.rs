//! The `{type, data}` wire envelope.
//!
//! Every party speaks in envelopes. Typed messages (`BrokerRequest`,
//! `BrokerEvent`, the worker protocol) are adjacently tagged serde enums, so
//! an envelope is just the untyped view of the same JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// The untyped wire unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Parse a text frame.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(|e| EnvelopeError::Invalid(e.to_string()))
    }

    /// Render a typed message as an envelope.
    pub fn encode<T: Serialize>(message: &T) -> Result<Self, EnvelopeError> {
        let value =
            serde_json::to_value(message).map_err(|e| EnvelopeError::Invalid(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| EnvelopeError::Invalid(e.to_string()))
    }

    /// Decode into a typed message whose tags are listed in `known`.
    ///
    /// Tags outside `known` are reported as [`EnvelopeError::UnknownType`] so
    /// callers can log and drop them; a missing `data` is treated as `{}`.
    pub fn decode<T: DeserializeOwned>(self, known: &[&str]) -> Result<T, EnvelopeError> {
        if !known.contains(&self.kind.as_str()) {
            return Err(EnvelopeError::UnknownType(self.kind));
        }
        let data = if self.data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.data
        };
        let tagged = serde_json::json!({ "type": self.kind, "data": data });
        serde_json::from_value(tagged).map_err(|e| EnvelopeError::Malformed {
            kind: self.kind,
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        // Envelope holds only strings and JSON values; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
