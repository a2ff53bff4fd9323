//! Client configuration.

use crate::circuit_breaker::CircuitPolicy;
use crate::retry::RetryConfig;
use std::time::Duration;

/// Ordering of cache and network for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Always go to the network, never read or write the cache.
    #[default]
    NoCache,
    /// Serve a cached value when present, otherwise go to the network.
    CacheFirst,
    /// Go to the network, fall back to the cache when it fails.
    NetworkFirst,
    /// Only ever serve from the cache.
    OfflineOnly,
}

impl CachePolicy {
    /// Whether a failed network call may be answered from the cache.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::NetworkFirst | Self::CacheFirst)
    }

    /// Whether successful responses are written to the cache.
    pub fn writes_cache(&self) -> bool {
        !matches!(self, Self::NoCache)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL that relative request paths are joined to.
    pub base_url: Option<String>,
    /// Default request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout between body chunks.
    pub read_timeout: Option<Duration>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Circuit breaker policy.
    pub circuit: CircuitPolicy,
    /// Cache policy for requests that do not set one.
    pub default_cache_policy: CachePolicy,
    /// Idle timeout for pooled connections.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            retry: RetryConfig::default(),
            circuit: CircuitPolicy::default(),
            default_cache_policy: CachePolicy::NoCache,
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            default_headers: Vec::new(),
            user_agent: format!("resilient-client/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for client configuration.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Set the circuit breaker policy.
    pub fn circuit_breaker(mut self, policy: CircuitPolicy) -> Self {
        self.config.circuit = policy;
        self
    }

    /// Set the default cache policy.
    pub fn default_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.default_cache_policy = policy;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .base_url("https://api.example.com")
            .timeout(Duration::from_secs(5))
            .default_header("X-App", "demo")
            .default_cache_policy(CachePolicy::NetworkFirst)
            .retry(RetryConfig::disabled())
            .build();

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.default_headers.len(), 1);
        assert_eq!(config.default_cache_policy, CachePolicy::NetworkFirst);
        assert!(!config.retry.enabled);
    }

    #[test]
    fn test_cache_policy_traits() {
        assert!(CachePolicy::NetworkFirst.allows_fallback());
        assert!(CachePolicy::CacheFirst.allows_fallback());
        assert!(!CachePolicy::NoCache.allows_fallback());
        assert!(!CachePolicy::NoCache.writes_cache());
        assert!(CachePolicy::OfflineOnly.writes_cache());
    }
}
