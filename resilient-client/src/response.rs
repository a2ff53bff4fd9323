//! HTTP response wrapper and the executor's outcome type.

use crate::error::{AppError, TransportError};
use crate::meta::ResponseMeta;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// Raw HTTP response returned by a transport.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Create a response from a reqwest response, reading the whole body.
    pub(crate) async fn from_reqwest(
        response: reqwest::Response,
    ) -> std::result::Result<Self, TransportError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as lossy UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of a request: a value with metadata, or a classified failure.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The request produced a value.
    Success {
        /// Decoded value.
        value: T,
        /// How the value was obtained.
        meta: ResponseMeta,
    },
    /// The request failed.
    Failure(AppError),
}

impl<T> Outcome<T> {
    /// Check if this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if this is a failure.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Get the value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Get the metadata, if any.
    pub fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            Self::Success { meta, .. } => Some(meta),
            Self::Failure(_) => None,
        }
    }

    /// Get the error, if any.
    pub fn error(&self) -> Option<&AppError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Transform the value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success { value, meta } => Outcome::Success {
                value: f(value),
                meta,
            },
            Self::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> std::result::Result<(T, ResponseMeta), AppError> {
        match self {
            Self::Success { value, meta } => Ok((value, meta)),
            Self::Failure(error) => Err(error),
        }
    }
}

impl<T> From<AppError> for Outcome<T> {
    fn from(error: AppError) -> Self {
        Self::Failure(error)
    }
}
