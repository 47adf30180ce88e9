//! # Payload Codec
//!
//! JSON is the wire format. Payloads that are not JSON degrade to text, and
//! payloads that are not UTF-8 degrade to raw bytes. Decoding never fails.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Content type stamped on JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type stamped on text payloads.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Content type stamped on opaque payloads.
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// Errors converting between payloads and typed values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload did not match the requested type.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// A typed value was requested from a non-JSON payload.
    #[error("payload is not JSON (got {kind})")]
    NotJson { kind: &'static str },
}

/// A decoded message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Valid JSON document.
    Json(serde_json::Value),
    /// UTF-8 text that is not JSON.
    Text(String),
    /// Anything else.
    Binary(Bytes),
}

impl Payload {
    /// Serialize a value as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be represented as JSON.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    /// Decode raw bytes, degrading JSON -> text -> binary.
    ///
    /// A content type of `application/octet-stream` skips the JSON and text
    /// attempts entirely; `text/plain` skips the JSON attempt, so text that
    /// happens to parse as JSON (`42`, `true`) stays text.
    #[must_use]
    pub fn decode(bytes: Bytes, content_type: Option<&str>) -> Self {
        match content_type {
            Some(CONTENT_TYPE_BINARY) => return Self::Binary(bytes),
            Some(CONTENT_TYPE_TEXT) => {}
            _ => {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                    return Self::Json(value);
                }
            }
        }
        match std::str::from_utf8(&bytes) {
            Ok(text) => Self::Text(text.to_owned()),
            Err(_) => Self::Binary(bytes),
        }
    }

    /// Bytes to put on the wire together with their content type.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if a JSON value fails to serialize.
    pub fn to_wire(&self) -> Result<(Bytes, &'static str), CodecError> {
        match self {
            Self::Json(value) => Ok((Self::encode(value)?, CONTENT_TYPE_JSON)),
            Self::Text(text) => Ok((Bytes::from(text.clone()), CONTENT_TYPE_TEXT)),
            Self::Binary(bytes) => Ok((bytes.clone(), CONTENT_TYPE_BINARY)),
        }
    }

    /// Short name of the variant, for logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }

    /// Borrow the JSON value, if this is a JSON payload.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Convert into a JSON value. Text becomes a JSON string; binary fails.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::NotJson` for binary payloads.
    pub fn into_json(self) -> Result<serde_json::Value, CodecError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Text(text) => Ok(serde_json::Value::String(text)),
            Self::Binary(_) => Err(CodecError::NotJson { kind: "binary" }),
        }
    }

    /// Deserialize into a typed value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the JSON shape does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, CodecError> {
        let value = self.into_json()?;
        serde_json::from_value(value).map_err(CodecError::Decode)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}
