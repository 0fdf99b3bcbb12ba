//! Framing helpers for channel payloads.

use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// A message received on (or published for) a channel.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Frame that parsed as JSON
    Json(Value),
    /// Frame that did not parse; delivered unchanged
    Text(String),
}

impl Payload {
    /// Decode an inbound text frame.
    ///
    /// Frames that are not valid JSON fall back to [`Payload::Text`]. This is
    /// the expected path for plain-text servers and is never an error.
    #[must_use]
    pub fn from_frame(text: &str) -> Self {
        serde_json::from_str(text).map_or_else(|_e| Self::Text(text.to_owned()), Self::Json)
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

/// Encode an outbound payload as a text frame.
///
/// Strings go out verbatim; everything else is serialized to JSON.
pub(crate) fn to_frame<P: Serialize + ?Sized>(payload: &P) -> Result<String> {
    match serde_json::to_value(payload)? {
        Value::String(text) => Ok(text),
        value => Ok(serde_json::to_string(&value)?),
    }
}
