//! Error types.
//!
//! [`AppError`] is the taxonomy every request failure is folded into before it
//! reaches the caller. [`TransportError`] describes what went wrong below HTTP,
//! and [`ClientError`] covers client construction.

use http::HeaderMap;
use std::fmt;
use thiserror::Error;

/// Result type for client construction and plumbing.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised while building a client or a request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Request body could not be encoded.
    #[error("Failed to encode request body: {0}")]
    Body(String),

    /// Underlying HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Failures below the HTTP layer, reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established.
    #[error("Connection error: {0}")]
    Connect(String),

    /// Host name could not be resolved.
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// TLS handshake or certificate failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O failure on an established connection.
    #[error("I/O error: {0}")]
    Io(String),

    /// Response body could not be read or decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Anything else.
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Failures that mean the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Dns(_) | Self::Tls(_))
    }

    /// I/O-class failures: retryable and eligible for cache fallback.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Dns(_) | Self::Tls(_) | Self::Io(_)
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            return Self::Timeout(message);
        }
        if error.is_decode() {
            return Self::Decode(message);
        }
        if error.is_connect() {
            let chain = error_chain(&error).to_ascii_lowercase();
            if chain.contains("dns") || chain.contains("resolve") {
                return Self::Dns(chain);
            }
            if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake")
            {
                return Self::Tls(chain);
            }
            return Self::Connect(chain);
        }
        if error.is_body() || error.is_request() {
            return Self::Io(error_chain(&error));
        }
        Self::Other(message)
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Keys for user-facing error messages, resolved through a
/// [`StringProvider`](crate::StringProvider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKey {
    /// No network connectivity.
    Offline,
    /// Circuit breaker rejected the call.
    CircuitOpen,
    /// Generic network failure.
    Network,
    /// Request timed out.
    Timeout,
    /// Response could not be parsed.
    Parsing,
    /// Authentication required (401).
    Unauthorized,
    /// Access denied (403).
    Forbidden,
    /// Rate limited (429).
    RateLimited,
    /// Other 4xx.
    ClientError,
    /// 5xx.
    ServerError,
    /// Business failure reported by the backend.
    Business,
    /// Anything else.
    Unknown,
}

impl ErrorKey {
    /// Stable string form of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "error.offline",
            Self::CircuitOpen => "error.circuit_open",
            Self::Network => "error.network",
            Self::Timeout => "error.timeout",
            Self::Parsing => "error.parsing",
            Self::Unauthorized => "error.unauthorized",
            Self::Forbidden => "error.forbidden",
            Self::RateLimited => "error.rate_limited",
            Self::ClientError => "error.client",
            Self::ServerError => "error.server",
            Self::Business => "error.business",
            Self::Unknown => "error.unknown",
        }
    }
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine codes attached to errors produced by the client itself.
pub mod codes {
    /// The device reported no connectivity.
    pub const OFFLINE: &str = "OFFLINE";
    /// The circuit breaker rejected the call.
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    /// A 304 arrived but nothing was cached for the key.
    pub const CACHE_MISS_ON_304: &str = "CACHE_MISS_ON_304";
    /// The request could not be built.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
}

/// Failure taxonomy returned to callers.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Connectivity or transport I/O failure.
    #[error("{message}")]
    Network {
        /// Whether the backend was unreachable (offline, breaker open, DNS...).
        is_connectivity: bool,
        /// Underlying cause, if any.
        cause: Option<String>,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// Request timed out.
    #[error("{message}")]
    Timeout {
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// Response could not be decoded.
    #[error("{message}")]
    Parsing {
        /// Decoder error.
        cause: String,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// Authentication or authorization failure.
    #[error("{message}")]
    Auth {
        /// Reason, e.g. `HTTP_401`.
        reason: String,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// HTTP 4xx/5xx response.
    #[error("{message}")]
    Server {
        /// HTTP status code.
        status_code: u16,
        /// Response body as text.
        body: String,
        /// Response headers.
        headers: HeaderMap,
        /// `X-Request-Id` of the response.
        request_id: Option<String>,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// HTTP 429.
    #[error("{message}")]
    RateLimited {
        /// Seconds to wait, from `Retry-After`.
        retry_after_seconds: Option<u64>,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// Application-level failure inside a successful response.
    #[error("{message}")]
    Business {
        /// Raw error payload from the envelope.
        payload: serde_json::Value,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },

    /// Unclassified failure.
    #[error("{message}")]
    Unknown {
        /// Underlying cause.
        cause: String,
        /// Human-readable message.
        message: String,
        /// Machine error code.
        code: Option<String>,
    },
}

impl AppError {
    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::Timeout { message, .. }
            | Self::Parsing { message, .. }
            | Self::Auth { message, .. }
            | Self::Server { message, .. }
            | Self::RateLimited { message, .. }
            | Self::Business { message, .. }
            | Self::Unknown { message, .. } => message,
        }
    }

    /// Machine error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Network { code, .. }
            | Self::Timeout { code, .. }
            | Self::Parsing { code, .. }
            | Self::Auth { code, .. }
            | Self::Server { code, .. }
            | Self::RateLimited { code, .. }
            | Self::Business { code, .. }
            | Self::Unknown { code, .. } => code.as_deref(),
        }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status_code, .. } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            Self::Auth { reason, .. } => reason
                .strip_prefix("HTTP_")
                .and_then(|code| code.parse().ok()),
            _ => None,
        }
    }

    /// Check if this is a connectivity failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Network {
                is_connectivity: true,
                ..
            }
        )
    }

    /// Check if the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        self.is_connectivity() && self.code() == Some(codes::CIRCUIT_OPEN)
    }

    /// Failures that say something about the health of the backend.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::Server { .. }
                | Self::RateLimited { .. }
        )
    }
}
