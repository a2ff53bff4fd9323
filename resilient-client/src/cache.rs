//! Response cache and ETag store.
//!
//! Values are stored as JSON through the object-safe [`CacheStore`] trait so
//! that a durable backend can replace [`MemoryCacheStore`]. [`ResponseCache`]
//! is the typed facade the client talks to.

use crate::meta::ResponseMeta;
use async_trait::async_trait;
use http::Method;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Backend error
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Cache key: HTTP method plus a caller-chosen namespace.
///
/// The namespace names a logical endpoint (`/users`, `users:list`, or a full
/// URL) so cache buckets are independent of incidental query strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    namespace: String,
}

impl CacheKey {
    /// Create a new cache key.
    pub fn new(method: Method, namespace: impl Into<String>) -> Self {
        Self {
            method,
            namespace: namespace.into(),
        }
    }

    /// Get the method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check whether an invalidation prefix covers this key.
    ///
    /// A prefix carrying a URL scheme is compared with the raw namespace.
    /// Anything else is treated as a path prefix and compared with the path
    /// component of the namespace, with a leading `/` added when missing.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        if prefix.contains("://") {
            return self.namespace.starts_with(prefix);
        }

        let prefix = if prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        };
        self.path().starts_with(&prefix)
    }

    fn path(&self) -> String {
        if self.namespace.contains("://") {
            if let Ok(url) = url::Url::parse(&self.namespace) {
                return url.path().to_string();
            }
        }

        let path = self
            .namespace
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.namespace)
    }
}

/// A cached JSON body with its metadata.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Cached body.
    pub body: serde_json::Value,
    /// Metadata captured when the body was written.
    pub meta: ResponseMeta,
}

/// A typed cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry<T> {
    /// Cached value.
    pub value: T,
    /// Metadata, always marked `from_cache`.
    pub meta: ResponseMeta,
}

/// Storage backend for cached bodies and ETags.
///
/// Implementations must prune bodies and ETags together in
/// [`invalidate`](CacheStore::invalidate), so that no reader sees one without
/// the other for the same key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a cached body.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<StoredEntry>>;

    /// Store a body, replacing any previous one.
    async fn put(&self, key: &CacheKey, entry: StoredEntry) -> CacheResult<()>;

    /// Get the ETag stored for a key.
    async fn get_etag(&self, key: &CacheKey) -> CacheResult<Option<String>>;

    /// Store an ETag.
    async fn put_etag(&self, key: &CacheKey, etag: String) -> CacheResult<()>;

    /// Forget the ETag stored for a key.
    async fn delete_etag(&self, key: &CacheKey) -> CacheResult<()>;

    /// Remove every entry covered by `prefix`, or everything when `None`.
    async fn invalidate(&self, prefix: Option<&str>) -> CacheResult<usize>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<CacheKey, StoredEntry>,
    etags: HashMap<CacheKey, String>,
}

/// In-process cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached bodies.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Check if no bodies are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<StoredEntry>> {
        Ok(self.inner.read().entries.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, entry: StoredEntry) -> CacheResult<()> {
        self.inner.write().entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn get_etag(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        Ok(self.inner.read().etags.get(key).cloned())
    }

    async fn put_etag(&self, key: &CacheKey, etag: String) -> CacheResult<()> {
        self.inner.write().etags.insert(key.clone(), etag);
        Ok(())
    }

    async fn delete_etag(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner.write().etags.remove(key);
        Ok(())
    }

    async fn invalidate(&self, prefix: Option<&str>) -> CacheResult<usize> {
        let mut inner = self.inner.write();
        let before = inner.entries.len();

        match prefix {
            None => {
                inner.entries.clear();
                inner.etags.clear();
            }
            Some(prefix) => {
                inner.entries.retain(|key, _| !key.matches_prefix(prefix));
                inner.etags.retain(|key, _| !key.matches_prefix(prefix));
            }
        }

        Ok(before - inner.entries.len())
    }
}

/// Typed response cache.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    /// Create a cache over the given store.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Create a cache over a fresh [`MemoryCacheStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read the ETag stored for a key.
    pub async fn read_etag(&self, key: &CacheKey) -> Option<String> {
        match self.store.get_etag(key).await {
            Ok(etag) => etag,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read ETag");
                None
            }
        }
    }

    /// Store an ETag for a key.
    pub async fn write_etag(&self, key: &CacheKey, etag: impl Into<String>) {
        if let Err(e) = self.store.put_etag(key, etag.into()).await {
            warn!(key = %key, error = %e, "Failed to write ETag");
        }
    }

    /// Drop the ETag stored for a key.
    pub async fn remove_etag(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete_etag(key).await {
            warn!(key = %key, error = %e, "Failed to remove ETag");
        }
    }

    /// Read a typed value.
    ///
    /// The returned metadata is always marked `from_cache`. A stored body
    /// that no longer decodes into `T` counts as a miss.
    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CachedEntry<T>> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_value::<T>(entry.body) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(CachedEntry {
                    value,
                    meta: entry.meta.cached(),
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached body no longer decodes, treating as miss");
                None
            }
        }
    }

    /// Write a typed value.
    pub async fn write<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        meta: &ResponseMeta,
    ) -> CacheResult<()> {
        let body = serde_json::to_value(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let meta = ResponseMeta {
            from_cache: false,
            ..meta.clone()
        };
        self.store.put(key, StoredEntry { body, meta }).await
    }

    /// Remove cached bodies and ETags covered by `prefix`, or everything.
    pub async fn invalidate(&self, prefix: Option<&str>) -> usize {
        match self.store.invalidate(prefix).await {
            Ok(removed) => {
                debug!(prefix = ?prefix, removed, "Cache invalidated");
                removed
            }
            Err(e) => {
                warn!(prefix = ?prefix, error = %e, "Cache invalidation failed");
                0
            }
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache").finish_non_exhaustive()
    }
}
