//! Request description and builder.

use crate::NetworkClient;
use crate::config::CachePolicy;
use crate::decode::{DecodeError, Decoded, EnvelopeDecoder, JsonDecoder, ResponseDecoder};
use crate::error::ClientError;
use crate::response::Outcome;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Everything the executor needs to know about one call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Cache policy; the client default applies when unset.
    pub cache_policy: Option<CachePolicy>,
    /// Cache namespace; the resolved URL is used when unset.
    pub cache_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Create a request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            cache_policy: None,
            cache_key: None,
            timeout: None,
        }
    }
}

/// HTTP request builder.
pub struct RequestBuilder<'a> {
    client: &'a NetworkClient,
    request: ApiRequest,
    error: Option<ClientError>,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new request builder.
    pub(crate) fn new(client: &'a NetworkClient, method: Method, path: String) -> Self {
        Self {
            client,
            request: ApiRequest::new(method, path),
            error: None,
        }
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.request.headers.insert(name, value);
            }
            _ => {
                self.error
                    .get_or_insert(ClientError::InvalidHeader(name.as_ref().to_string()));
            }
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.request.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.request.query.push((k.into(), v.into()));
        }
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.request.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.request.body = Some(Bytes::from(text.into()));
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.request.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.request.body = Some(Bytes::from(bytes));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize JSON body");
                self.error.get_or_insert(ClientError::Body(e.to_string()));
            }
        }
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.request.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                self.request.body = Some(Bytes::from(encoded));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode form data");
                self.error.get_or_insert(ClientError::Body(e.to_string()));
            }
        }
        self
    }

    /// Set basic authentication, bypassing the token store.
    pub fn basic_auth(
        self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        use base64::Engine;
        let credentials = match password {
            Some(p) => format!("{}:{}", username.into(), p.into()),
            None => format!("{}:", username.into()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.header("Authorization", format!("Basic {}", encoded))
    }

    /// Set the cache policy.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.cache_policy = Some(policy);
        self
    }

    /// Set the cache namespace for this logical endpoint.
    pub fn cache_key(mut self, namespace: impl Into<String>) -> Self {
        self.request.cache_key = Some(namespace.into());
        self
    }

    /// Set a custom timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Finish building without sending.
    pub fn build(self) -> Result<ApiRequest, ClientError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.request),
        }
    }

    /// Send the request and decode a plain JSON body.
    pub async fn send_json<T>(self) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        self.send_with(&JsonDecoder::<T>::new()).await
    }

    /// Send the request and decode an envelope body.
    pub async fn send_envelope<T>(self) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        self.send_with(&EnvelopeDecoder::<T>::new()).await
    }

    /// Send the request and decode the body with `decoder`.
    pub async fn send_with<T, D>(self, decoder: &D) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned + Send,
        D: ResponseDecoder<T> + ?Sized,
    {
        let client = self.client;
        match self.build() {
            Ok(request) => client.execute(request, decoder).await,
            Err(error) => Outcome::Failure(client.invalid_request(&error)),
        }
    }

    /// Send the request and return the raw body bytes.
    pub async fn send_bytes(self) -> Outcome<Vec<u8>> {
        let decoder = |body: &[u8]| -> Result<Decoded<Vec<u8>>, DecodeError> {
            Ok(Decoded::Value(body.to_vec()))
        };
        self.send_with(&decoder).await
    }
}
