//! # Resilient Client
//!
//! The networking core of an application that talks to a single backend over
//! unreliable links.
//!
//! ## Features
//!
//! - **Circuit Breaker**: Rolling-window failure counting with a single half-open probe
//! - **Response Cache**: Typed cache with pluggable stores, ETags and conditional requests
//! - **Cache Policies**: `NoCache`, `CacheFirst`, `NetworkFirst`, `OfflineOnly`
//! - **Token Refresh**: Concurrent 401s collapse into one refresh call
//! - **Retry with Backoff**: Exponential backoff with jitter, honouring `Retry-After`
//! - **Error Taxonomy**: Every failure folded into an [`AppError`]
//! - **Response Metadata**: Status, latency, pagination, request id, cache origin
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilient_client::{NetworkClient, Outcome};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let client = NetworkClient::builder()
//!         .base_url("https://api.example.com")
//!         .build()?;
//!
//!     match client.get("/users/1").send_json::<User>().await {
//!         Outcome::Success { value, meta } => println!("{value:?} in {:?}", meta.latency),
//!         Outcome::Failure(error) => eprintln!("{}", error.message()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## With Caching and Authentication
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use resilient_client::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Auth;
//!
//! #[async_trait]
//! impl AuthOrchestrator for Auth {
//!     fn should_attach(&self, url: &Url) -> bool {
//!         !url.path().starts_with("/auth")
//!     }
//!
//!     async fn refresh(
//!         &self,
//!         _access: Option<String>,
//!         _refresh: Option<String>,
//!     ) -> Option<TokenPair> {
//!         None
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .retry(RetryConfig::exponential(3, Duration::from_millis(200)))
//!         .circuit_breaker(CircuitPolicy::default())
//!         .default_cache_policy(CachePolicy::NetworkFirst)
//!         .build();
//!
//!     let client = NetworkClient::builder()
//!         .config(config)
//!         .auth_orchestrator(Arc::new(Auth))
//!         .build()?;
//!
//!     // Served from the cache when the network fails
//!     let feed = client
//!         .get("/feed")
//!         .cache_key("feed")
//!         .send_json::<serde_json::Value>()
//!         .await;
//!
//!     if let Some(error) = feed.error() {
//!         eprintln!("{}", error.message());
//!     }
//!     Ok(())
//! }
//! ```

mod auth;
mod cache;
mod circuit_breaker;
mod classifier;
mod client;
mod config;
mod connectivity;
mod decode;
mod error;
mod meta;
mod request;
mod response;
mod retry;
mod transport;

pub use auth::{
    AuthAttachment, AuthOrchestrator, InMemoryTokenStore, RefreshCoordinator, RefreshOutcome,
    TokenPair, TokenStore,
};
pub use cache::{
    CacheError, CacheKey, CacheResult, CacheStore, CachedEntry, MemoryCacheStore, ResponseCache,
    StoredEntry,
};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitPolicy, CircuitState};
pub use classifier::{DefaultStrings, ErrorClassifier, StringProvider, parse_retry_after};
pub use client::{NetworkClient, NetworkClientBuilder};
pub use config::{CachePolicy, ClientConfig, ClientConfigBuilder};
pub use connectivity::{AlwaysOnline, ConnectivityMonitor, LinkType, WatchConnectivity};
pub use decode::{DecodeError, Decoded, EnvelopeDecoder, JsonDecoder, ResponseDecoder};
pub use error::{AppError, ClientError, ErrorKey, Result, TransportError, codes};
pub use meta::{Pagination, REQUEST_ID_HEADER, ResponseMeta};
pub use request::{ApiRequest, RequestBuilder};
pub use response::{Outcome, Response};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{ReqwestTransport, Transport, TransportRequest};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use resilient_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{AuthOrchestrator, InMemoryTokenStore, TokenPair, TokenStore};
    pub use crate::cache::{CacheStore, MemoryCacheStore};
    pub use crate::circuit_breaker::{CircuitPolicy, CircuitState};
    pub use crate::client::{NetworkClient, NetworkClientBuilder};
    pub use crate::config::{CachePolicy, ClientConfig, ClientConfigBuilder};
    pub use crate::connectivity::{ConnectivityMonitor, LinkType};
    pub use crate::decode::{EnvelopeDecoder, JsonDecoder, ResponseDecoder};
    pub use crate::error::{AppError, ClientError, Result};
    pub use crate::meta::{Pagination, ResponseMeta};
    pub use crate::response::Outcome;
    pub use crate::retry::RetryConfig;
    pub use http::{HeaderMap, Method, StatusCode};
    pub use url::Url;
}
