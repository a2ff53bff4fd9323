//! Response body decoders.
//!
//! A decoder turns a 2xx body into a value, or reports that the body is an
//! envelope signalling a business failure.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use thiserror::Error;

/// Body could not be decoded.
#[derive(Debug, Error)]
#[error("Failed to decode response body: {0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(error: serde_json::Error) -> Self {
        Self(error.to_string())
    }
}

/// What a decoder found in a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// The payload.
    Value(T),
    /// The backend reported an application-level failure.
    BusinessError {
        /// Raw error payload.
        payload: serde_json::Value,
        /// Message supplied by the backend.
        message: Option<String>,
        /// Error code supplied by the backend.
        code: Option<String>,
    },
}

/// Decodes 2xx bodies.
pub trait ResponseDecoder<T>: Send + Sync {
    /// Decode a body.
    fn decode(&self, body: &[u8]) -> Result<Decoded<T>, DecodeError>;
}

impl<T, F> ResponseDecoder<T> for F
where
    F: Fn(&[u8]) -> Result<Decoded<T>, DecodeError> + Send + Sync,
{
    fn decode(&self, body: &[u8]) -> Result<Decoded<T>, DecodeError> {
        self(body)
    }
}

/// Plain JSON body.
///
/// An empty body decodes as JSON `null`, so `()` and `Option<_>` targets work
/// for `204 No Content`.
#[derive(Debug)]
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    /// Create a JSON decoder.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseDecoder<T> for JsonDecoder<T> {
    fn decode(&self, body: &[u8]) -> Result<Decoded<T>, DecodeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Decoded::Value(serde_json::from_value(serde_json::Value::Null)?));
        }
        Ok(Decoded::Value(serde_json::from_slice(body)?))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "ok")]
    success: bool,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Envelope body: `{"success": bool, "data": ..., "error": {"code", "message"}}`.
///
/// `ok` is accepted as an alias of `success`. A `false` flag yields
/// [`Decoded::BusinessError`] carrying the `error` object.
#[derive(Debug)]
pub struct EnvelopeDecoder<T>(PhantomData<fn() -> T>);

impl<T> EnvelopeDecoder<T> {
    /// Create an envelope decoder.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for EnvelopeDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseDecoder<T> for EnvelopeDecoder<T> {
    fn decode(&self, body: &[u8]) -> Result<Decoded<T>, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        if envelope.success {
            return Ok(Decoded::Value(serde_json::from_value(envelope.data)?));
        }

        let payload = envelope.error.unwrap_or(serde_json::Value::Null);
        let field = |name: &str| {
            payload.get(name).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        let message = field("message");
        let code = field("code");

        Ok(Decoded::BusinessError {
            payload,
            message,
            code,
        })
    }
}
