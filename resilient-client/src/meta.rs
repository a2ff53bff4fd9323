//! Response metadata.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Header carrying the backend request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Pagination descriptor taken from response headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pagination {
    /// Page-number pagination.
    Paged {
        /// Current page.
        page: Option<u64>,
        /// Items per page.
        page_size: Option<u64>,
        /// Next page number.
        next_page: Option<u64>,
        /// Previous page number.
        prev_page: Option<u64>,
        /// Total number of items.
        total: Option<u64>,
    },
    /// Cursor pagination.
    Cursor {
        /// Cursor for the next page.
        next: Option<String>,
        /// Cursor for the previous page.
        prev: Option<String>,
    },
}

impl Pagination {
    /// Extract pagination from headers.
    ///
    /// Names are matched case-insensitively and `_` is accepted in place of
    /// `-`, so both `X-Next-Page` and `x_next_page` are understood. Cursor
    /// headers win over page headers when both are present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let mut normalized: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                normalized
                    .entry(name.as_str().to_ascii_lowercase().replace('_', "-"))
                    .or_insert_with(|| value.trim().to_string());
            }
        }

        let text = |name: &str| normalized.get(name).filter(|v| !v.is_empty()).cloned();
        let number = |name: &str| text(name).and_then(|v| v.parse::<u64>().ok());

        let next_cursor = text("x-next-cursor");
        let prev_cursor = text("x-prev-cursor");
        if next_cursor.is_some() || prev_cursor.is_some() {
            return Some(Self::Cursor {
                next: next_cursor,
                prev: prev_cursor,
            });
        }

        let page = number("x-page");
        let page_size = number("x-page-size");
        let next_page = number("x-next-page");
        let prev_page = number("x-prev-page");
        let total = number("x-total");
        if page.is_none()
            && page_size.is_none()
            && next_page.is_none()
            && prev_page.is_none()
            && total.is_none()
        {
            return None;
        }

        Some(Self::Paged {
            page,
            page_size,
            next_page,
            prev_page,
            total,
        })
    }
}

/// Metadata describing how a value was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status_code: u16,
    /// Pagination descriptor, if the backend sent one.
    pub pagination: Option<Pagination>,
    /// Time from sending the request to receiving the response.
    pub latency: Duration,
    /// When the response was received.
    pub received_at: DateTime<Utc>,
    /// Response headers, lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// `ETag` validator.
    pub etag: Option<String>,
    /// `X-Request-Id` of the response.
    pub request_id: Option<String>,
    /// Whether the value was served from the cache.
    pub from_cache: bool,
}

impl ResponseMeta {
    /// Build metadata from a network response.
    pub fn from_response(status_code: u16, headers: &HeaderMap, latency: Duration) -> Self {
        let echoed = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            status_code,
            pagination: Pagination::from_headers(headers),
            latency,
            received_at: Utc::now(),
            headers: echoed,
            etag: header_str(headers, http::header::ETAG.as_str()),
            request_id: header_str(headers, REQUEST_ID_HEADER),
            from_cache: false,
        }
    }

    /// Copy of this metadata marked as served from the cache.
    pub fn cached(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }

    /// Copy of this metadata with a different status code.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Get an echoed header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
