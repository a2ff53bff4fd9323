//! Network client and request executor.

use http::header::{AUTHORIZATION, IF_NONE_MATCH};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::auth::{
    AuthOrchestrator, InMemoryTokenStore, RefreshCoordinator, RefreshOutcome, TokenStore,
};
use crate::cache::{CacheKey, CacheStore, MemoryCacheStore, ResponseCache};
use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitState};
use crate::classifier::{ErrorClassifier, StringProvider, parse_retry_after};
use crate::config::{CachePolicy, ClientConfig};
use crate::connectivity::{AlwaysOnline, ConnectivityMonitor};
use crate::decode::{Decoded, ResponseDecoder};
use crate::error::{AppError, ClientError, Result, TransportError, codes};
use crate::meta::ResponseMeta;
use crate::request::{ApiRequest, RequestBuilder};
use crate::response::{Outcome, Response};
use crate::retry::RetryPolicy;
use crate::transport::{ReqwestTransport, Transport, TransportRequest};

/// HTTP client with circuit breaker, response cache, token refresh and retry.
///
/// Cloning is cheap; clones share the breaker, cache and refresh state.
#[derive(Clone)]
pub struct NetworkClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    cache: ResponseCache,
    connectivity: Arc<dyn ConnectivityMonitor>,
    refresh: Option<RefreshCoordinator>,
    classifier: ErrorClassifier,
    retry: RetryPolicy,
}

/// Response of the last transport attempt.
struct Sent {
    response: Response,
    latency: Duration,
}

/// Settles the breaker for one admitted request.
///
/// A probe that is dropped before reporting gives its slot back.
struct BreakerGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> BreakerGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            probe: admission == Admission::Probe,
            settled: false,
        }
    }

    fn success(&mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    fn failure(&mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerGuard<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

impl NetworkClient {
    /// Create a client builder.
    pub fn builder() -> NetworkClientBuilder {
        NetworkClientBuilder::default()
    }

    /// Create a client with the given configuration and default collaborators.
    pub fn new(config: ClientConfig) -> Result<Self> {
        NetworkClientBuilder::default().config(config).build()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Get the response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Get the circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Current circuit breaker state.
    pub fn breaker_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    /// Get the refresh coordinator, if authentication is configured.
    pub fn refresh_coordinator(&self) -> Option<&RefreshCoordinator> {
        self.inner.refresh.as_ref()
    }

    /// Remove cached entries whose key starts with `prefix`, or all entries.
    pub async fn invalidate_cache(&self, prefix: Option<&str>) -> usize {
        self.inner.cache.invalidate(prefix).await
    }

    /// Create a GET request builder.
    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, path.into())
    }

    /// Create a POST request builder.
    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, path.into())
    }

    /// Create a PUT request builder.
    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, path.into())
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, path.into())
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, path.into())
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    /// Execute a request and decode the body with `decoder`.
    ///
    /// Never panics and never returns early with an `Err`: every failure is
    /// folded into [`Outcome::Failure`].
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute<T, D>(&self, request: ApiRequest, decoder: &D) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned + Send,
        D: ResponseDecoder<T> + ?Sized,
    {
        let inner = &*self.inner;
        let policy = request.cache_policy.unwrap_or(inner.config.default_cache_policy);

        let (transport_request, key) = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(error) => return Outcome::Failure(self.invalid_request(&error)),
        };

        let admission = inner.breaker.admit();
        if !admission.is_allowed() {
            debug!("Circuit open, rejecting request");
            return Outcome::Failure(inner.classifier.circuit_open());
        }
        let mut guard = BreakerGuard::new(&inner.breaker, admission);

        if policy == CachePolicy::OfflineOnly {
            return match inner.cache.read::<T>(&key).await {
                Some(hit) => {
                    guard.success();
                    Outcome::Success {
                        value: hit.value,
                        meta: hit.meta,
                    }
                }
                None => Outcome::Failure(inner.classifier.offline()),
            };
        }

        if !inner.connectivity.is_online() {
            debug!("Device offline");
            if policy != CachePolicy::NoCache
                && let Some(hit) = inner.cache.read::<T>(&key).await
            {
                guard.success();
                return Outcome::Success {
                    value: hit.value,
                    meta: hit.meta,
                };
            }
            return Outcome::Failure(inner.classifier.offline());
        }

        if policy == CachePolicy::CacheFirst
            && let Some(hit) = inner.cache.read::<T>(&key).await
        {
            guard.success();
            return Outcome::Success {
                value: hit.value,
                meta: hit.meta,
            };
        }

        let sent = match self.send_authenticated(transport_request, &key).await {
            Ok(sent) => sent,
            Err(error) => {
                guard.failure();
                if policy.allows_fallback()
                    && error.is_io()
                    && let Some(hit) = inner.cache.read::<T>(&key).await
                {
                    debug!(error = %error, "Transport failed, serving cached response");
                    guard.success();
                    return Outcome::Success {
                        value: hit.value,
                        meta: hit.meta,
                    };
                }
                return Outcome::Failure(inner.classifier.from_transport(&error));
            }
        };

        let Sent { response, latency } = sent;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return match inner.cache.read::<T>(&key).await {
                Some(hit) => {
                    guard.success();
                    Outcome::Success {
                        value: hit.value,
                        meta: hit.meta.with_status(status.as_u16()),
                    }
                }
                None => {
                    warn!(key = %key, "304 received without a cached body");
                    Outcome::Failure(inner.classifier.cache_miss_on_not_modified())
                }
            };
        }

        if status.is_success() {
            let meta = ResponseMeta::from_response(status.as_u16(), response.headers(), latency);
            return match decoder.decode(response.bytes()) {
                Ok(Decoded::Value(value)) => {
                    if policy.writes_cache() {
                        match (inner.cache.write(&key, &value, &meta).await, &meta.etag) {
                            (Ok(()), Some(etag)) => {
                                inner.cache.write_etag(&key, etag.clone()).await;
                            }
                            (Ok(()), None) => inner.cache.remove_etag(&key).await,
                            (Err(e), _) => {
                                warn!(key = %key, error = %e, "Failed to write response to cache");
                                inner.cache.remove_etag(&key).await;
                            }
                        }
                    }
                    guard.success();
                    Outcome::Success { value, meta }
                }
                Ok(Decoded::BusinessError {
                    payload,
                    message,
                    code,
                }) => {
                    guard.success();
                    Outcome::Failure(inner.classifier.business(payload, message, code))
                }
                Err(e) => {
                    guard.success();
                    Outcome::Failure(inner.classifier.parsing(e.to_string()))
                }
            };
        }

        if policy == CachePolicy::NetworkFirst
            && inner.config.retry.should_retry_status(status.as_u16())
            && let Some(hit) = inner.cache.read::<T>(&key).await
        {
            debug!(status = %status, "Serving cached response for failed status");
            guard.success();
            return Outcome::Success {
                value: hit.value,
                meta: hit.meta,
            };
        }

        let error = inner
            .classifier
            .from_status(status, response.bytes(), response.headers());
        if error.is_infrastructure() {
            guard.failure();
        }
        Outcome::Failure(error)
    }

    pub(crate) fn invalid_request(&self, error: &ClientError) -> AppError {
        self.inner
            .classifier
            .unknown(error.to_string(), Some(codes::INVALID_REQUEST.to_string()))
    }

    /// Resolve the URL and headers and derive the cache key.
    fn prepare(&self, request: ApiRequest) -> Result<(TransportRequest, CacheKey)> {
        let mut url = self.build_url(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let namespace = request.cache_key.unwrap_or_else(|| url.to_string());
        let key = CacheKey::new(request.method.clone(), namespace);

        let mut headers = self.inner.default_headers.clone();
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let transport_request = TransportRequest {
            method: request.method,
            url,
            headers,
            body: request.body,
            timeout: request.timeout,
        };
        Ok((transport_request, key))
    }

    fn build_url(&self, path: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        match &self.inner.base_url {
            Some(base) => Ok(base.join(path.trim_start_matches('/'))?),
            None => Err(ClientError::InvalidUrl(path.to_string())),
        }
    }

    /// Attach the stored ETag and credentials, send, and on a 401 refresh
    /// the token and resend once.
    async fn send_authenticated(
        &self,
        mut request: TransportRequest,
        key: &CacheKey,
    ) -> std::result::Result<Sent, TransportError> {
        let inner = &*self.inner;

        if !request.headers.contains_key(IF_NONE_MATCH)
            && let Some(etag) = inner.cache.read_etag(key).await
        {
            match HeaderValue::from_str(&etag) {
                Ok(value) => {
                    request.headers.insert(IF_NONE_MATCH, value);
                }
                Err(_) => warn!(key = %key, "Stored ETag is not a valid header value"),
            }
        }

        let attachment = match &inner.refresh {
            Some(coordinator) if !request.headers.contains_key(AUTHORIZATION) => {
                coordinator.attachment_for(&request.url).await
            }
            _ => None,
        };
        if let Some(header) = attachment.as_ref().and_then(|a| a.header.as_deref()) {
            set_authorization(&mut request.headers, header);
        }

        let sent = self.send_with_retry(request.clone()).await?;
        if sent.response.status() != StatusCode::UNAUTHORIZED {
            return Ok(sent);
        }

        // One refresh per request; a second 401 is surfaced as is.
        let (Some(coordinator), Some(attachment)) = (&inner.refresh, attachment) else {
            return Ok(sent);
        };
        match coordinator
            .refresh_after_unauthorized(attachment.token.as_deref())
            .await
        {
            RefreshOutcome::Retry(token) => {
                debug!("Retrying request with refreshed token");
                set_authorization(&mut request.headers, &coordinator.header_value(&token));
                self.send_with_retry(request).await
            }
            RefreshOutcome::Failed => Ok(sent),
        }
    }

    async fn send_with_retry(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<Sent, TransportError> {
        let inner = &*self.inner;
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            match inner.transport.send(request.clone()).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if inner.retry.is_retryable_status(status) {
                        let retry_after = response
                            .header("retry-after")
                            .and_then(|v| parse_retry_after(v, SystemTime::now()));
                        if let Some(delay) = inner.retry.delay_for_status(attempt + 1, retry_after)
                        {
                            attempt += 1;
                            debug!(
                                attempt,
                                status,
                                delay = ?delay,
                                "Retrying request due to status code"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Ok(Sent {
                        response,
                        latency: started.elapsed(),
                    });
                }
                Err(e) => {
                    if inner.retry.is_retryable_error(&e)
                        && let Some(delay) = inner.retry.delay(attempt + 1)
                    {
                        attempt += 1;
                        debug!(
                            attempt,
                            error = %e,
                            delay = ?delay,
                            "Retrying request due to error"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn set_authorization(headers: &mut HeaderMap, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => warn!("Authorization value is not a valid header value"),
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("config", &self.inner.config)
            .field("breaker", &self.inner.breaker)
            .finish_non_exhaustive()
    }
}

/// Builder wiring a [`NetworkClient`] to its collaborators.
#[derive(Default)]
pub struct NetworkClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    connectivity: Option<Arc<dyn ConnectivityMonitor>>,
    token_store: Option<Arc<dyn TokenStore>>,
    orchestrator: Option<Arc<dyn AuthOrchestrator>>,
    strings: Option<Arc<dyn StringProvider>>,
}

impl NetworkClientBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default cache policy.
    pub fn default_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.default_cache_policy = policy;
        self
    }

    /// Use a custom transport instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom cache store.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Use a connectivity monitor.
    pub fn connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    /// Use a token store.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Enable token attachment and refresh.
    pub fn auth_orchestrator(mut self, orchestrator: Arc<dyn AuthOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Resolve error messages through `strings`.
    pub fn strings(mut self, strings: Arc<dyn StringProvider>) -> Self {
        self.strings = Some(strings);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<NetworkClient> {
        let config = self.config;

        let base_url = config.base_url.as_deref().map(parse_base_url).transpose()?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            default_headers.insert(header_name, header_value);
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config)?),
        };
        let cache_store: Arc<dyn CacheStore> = match self.cache_store {
            Some(store) => store,
            None => Arc::new(MemoryCacheStore::new()),
        };
        let refresh = self.orchestrator.map(|orchestrator| {
            let tokens: Arc<dyn TokenStore> = match self.token_store {
                Some(store) => store,
                None => Arc::new(InMemoryTokenStore::new()),
            };
            RefreshCoordinator::new(tokens, orchestrator)
        });
        let connectivity: Arc<dyn ConnectivityMonitor> = match self.connectivity {
            Some(monitor) => monitor,
            None => Arc::new(AlwaysOnline),
        };
        let classifier = match self.strings {
            Some(strings) => ErrorClassifier::new(strings),
            None => ErrorClassifier::default(),
        };

        Ok(NetworkClient {
            inner: Arc::new(ClientInner {
                base_url,
                default_headers,
                transport,
                breaker: CircuitBreaker::new(config.circuit.clone()),
                cache: ResponseCache::new(cache_store),
                connectivity,
                refresh,
                classifier,
                retry: RetryPolicy::new(config.retry.clone()),
                config,
            }),
        })
    }
}

/// Parse a base URL so that relative paths join beneath it.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
