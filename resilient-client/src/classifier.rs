//! Error classification.
//!
//! Maps transport failures and HTTP responses onto [`AppError`], resolving
//! user-facing text through a [`StringProvider`].

use crate::error::{AppError, ErrorKey, TransportError, codes};
use crate::meta::{REQUEST_ID_HEADER, header_str};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Resolves user-facing messages for error keys.
pub trait StringProvider: Send + Sync {
    /// Get the localized message for a key.
    fn resolve(&self, key: ErrorKey) -> String;
}

/// English messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrings;

impl StringProvider for DefaultStrings {
    fn resolve(&self, key: ErrorKey) -> String {
        match key {
            ErrorKey::Offline => "You appear to be offline. Check your connection and try again.",
            ErrorKey::CircuitOpen => {
                "The service is temporarily unavailable. Please try again shortly."
            }
            ErrorKey::Network => "A network error occurred. Please try again.",
            ErrorKey::Timeout => "The request timed out. Please try again.",
            ErrorKey::Parsing => "The server sent a response we could not read.",
            ErrorKey::Unauthorized => "Your session has expired. Please sign in again.",
            ErrorKey::Forbidden => "You do not have permission to do that.",
            ErrorKey::RateLimited => "Too many requests. Please wait a moment and try again.",
            ErrorKey::ClientError => "The request could not be completed.",
            ErrorKey::ServerError => "The server encountered an error. Please try again later.",
            ErrorKey::Business => "The operation could not be completed.",
            ErrorKey::Unknown => "Something went wrong.",
        }
        .to_string()
    }
}

/// Maps failures onto the [`AppError`] taxonomy.
#[derive(Clone)]
pub struct ErrorClassifier {
    strings: Arc<dyn StringProvider>,
}

impl ErrorClassifier {
    /// Create a classifier using the given string provider.
    pub fn new(strings: Arc<dyn StringProvider>) -> Self {
        Self { strings }
    }

    fn message(&self, key: ErrorKey) -> String {
        self.strings.resolve(key)
    }

    /// Classify a transport failure.
    pub fn from_transport(&self, error: &TransportError) -> AppError {
        match error {
            TransportError::Timeout(_) => AppError::Timeout {
                message: self.message(ErrorKey::Timeout),
                code: Some("TIMEOUT".to_string()),
            },
            TransportError::Connect(cause)
            | TransportError::Dns(cause)
            | TransportError::Tls(cause) => AppError::Network {
                is_connectivity: true,
                cause: Some(cause.clone()),
                message: self.message(ErrorKey::Network),
                code: Some("CONNECTIVITY".to_string()),
            },
            TransportError::Io(cause) => AppError::Network {
                is_connectivity: false,
                cause: Some(cause.clone()),
                message: self.message(ErrorKey::Network),
                code: Some("IO".to_string()),
            },
            TransportError::Decode(cause) => self.parsing(cause.clone()),
            TransportError::Other(cause) => self.unknown(cause.clone(), None),
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(&self, status: StatusCode, body: &[u8], headers: &HeaderMap) -> AppError {
        let code = status.as_u16();
        match code {
            401 | 403 => {
                let key = if code == 401 {
                    ErrorKey::Unauthorized
                } else {
                    ErrorKey::Forbidden
                };
                AppError::Auth {
                    reason: format!("HTTP_{code}"),
                    message: self.message(key),
                    code: Some(format!("HTTP_{code}")),
                }
            }
            429 => AppError::RateLimited {
                retry_after_seconds: headers
                    .get(http::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, SystemTime::now()))
                    .map(|d| d.as_secs()),
                message: self.message(ErrorKey::RateLimited),
                code: Some("HTTP_429".to_string()),
            },
            400..=599 => {
                let key = if code >= 500 {
                    ErrorKey::ServerError
                } else {
                    ErrorKey::ClientError
                };
                AppError::Server {
                    status_code: code,
                    body: String::from_utf8_lossy(body).into_owned(),
                    headers: headers.clone(),
                    request_id: header_str(headers, REQUEST_ID_HEADER),
                    message: self.message(key),
                    code: Some(format!("HTTP_{code}")),
                }
            }
            _ => self.unknown(
                format!("Unexpected HTTP status {status}"),
                Some(format!("HTTP_{code}")),
            ),
        }
    }

    /// A decoding failure.
    pub fn parsing(&self, cause: impl Into<String>) -> AppError {
        AppError::Parsing {
            cause: cause.into(),
            message: self.message(ErrorKey::Parsing),
            code: Some("PARSING".to_string()),
        }
    }

    /// The device is offline.
    pub fn offline(&self) -> AppError {
        AppError::Network {
            is_connectivity: true,
            cause: None,
            message: self.message(ErrorKey::Offline),
            code: Some(codes::OFFLINE.to_string()),
        }
    }

    /// The circuit breaker rejected the call.
    pub fn circuit_open(&self) -> AppError {
        AppError::Network {
            is_connectivity: true,
            cause: Some("circuit breaker open".to_string()),
            message: self.message(ErrorKey::CircuitOpen),
            code: Some(codes::CIRCUIT_OPEN.to_string()),
        }
    }

    /// A 304 arrived without a cached body to serve.
    pub fn cache_miss_on_not_modified(&self) -> AppError {
        AppError::Network {
            is_connectivity: false,
            cause: Some("304 Not Modified without a cached entry".to_string()),
            message: self.message(ErrorKey::Network),
            code: Some(codes::CACHE_MISS_ON_304.to_string()),
        }
    }

    /// A business failure carried by a successful response.
    pub fn business(
        &self,
        payload: serde_json::Value,
        message: Option<String>,
        code: Option<String>,
    ) -> AppError {
        AppError::Business {
            payload,
            message: message.unwrap_or_else(|| self.message(ErrorKey::Business)),
            code,
        }
    }

    /// An unclassified failure.
    pub fn unknown(&self, cause: impl Into<String>, code: Option<String>) -> AppError {
        AppError::Unknown {
            cause: cause.into(),
            message: self.message(ErrorKey::Unknown),
            code,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(DefaultStrings))
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

/// Parse a `Retry-After` value.
///
/// Accepts delta-seconds or an HTTP-date; dates in the past clamp to zero.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}
