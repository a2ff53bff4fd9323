//! Authentication: token storage and single-flight refresh.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// An access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: Option<String>,
}

impl TokenPair {
    /// Create a token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Holds the current tokens.
///
/// Reads must not block behind a pending write for long; implementations are
/// shared by every in-flight request.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current access token.
    async fn read_access_token(&self) -> Option<String>;

    /// Current refresh token.
    async fn read_refresh_token(&self) -> Option<String>;

    /// Replace both tokens.
    async fn write_tokens(&self, access_token: String, refresh_token: Option<String>);

    /// Forget all tokens.
    async fn clear(&self);
}

/// Token store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given tokens.
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn read_access_token(&self) -> Option<String> {
        self.tokens.read().as_ref().map(|t| t.access_token.clone())
    }

    async fn read_refresh_token(&self) -> Option<String> {
        self.tokens
            .read()
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
    }

    async fn write_tokens(&self, access_token: String, refresh_token: Option<String>) {
        *self.tokens.write() = Some(TokenPair {
            access_token,
            refresh_token,
        });
    }

    async fn clear(&self) {
        *self.tokens.write() = None;
    }
}

/// Performs the actual authentication calls.
#[async_trait]
pub trait AuthOrchestrator: Send + Sync {
    /// Whether the `Authorization` header belongs on a request to `url`.
    ///
    /// Login and refresh endpoints should return `false`.
    fn should_attach(&self, url: &Url) -> bool;

    /// Format the `Authorization` header value.
    fn auth_header_value(&self, access_token: &str) -> String {
        format!("Bearer {access_token}")
    }

    /// Exchange the current tokens for new ones. `None` means the refresh
    /// failed and the session is over.
    async fn refresh(
        &self,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Option<TokenPair>;
}

/// Credentials chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttachment {
    /// `Authorization` header value, absent when no token is stored.
    pub header: Option<String>,
    /// Token the header was built from.
    pub token: Option<String>,
}

/// Result of asking the coordinator for fresh credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Retry the request with this access token.
    Retry(String),
    /// No usable token; surface the original 401.
    Failed,
}

#[derive(Debug, Default)]
struct RefreshState {
    /// Completion number of the most recent refresh, if it failed.
    last_failure: Option<u64>,
    refreshes: u64,
}

/// Collapses concurrent 401s into a single refresh call.
///
/// The mutex is shared by every request on the client. The first caller to
/// enter performs the refresh; callers queued behind it find the token store
/// already updated and reuse the result. Callers queued behind a refresh that
/// failed give up; later callers try again.
pub struct RefreshCoordinator {
    tokens: Arc<dyn TokenStore>,
    orchestrator: Arc<dyn AuthOrchestrator>,
    completed: AtomicU64,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    /// Create a coordinator.
    pub fn new(tokens: Arc<dyn TokenStore>, orchestrator: Arc<dyn AuthOrchestrator>) -> Self {
        Self {
            tokens,
            orchestrator,
            completed: AtomicU64::new(0),
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Get the token store.
    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Get the orchestrator.
    pub fn orchestrator(&self) -> &Arc<dyn AuthOrchestrator> {
        &self.orchestrator
    }

    /// Decide what to attach to a request for `url`.
    ///
    /// `None` means the target does not take credentials at all.
    pub async fn attachment_for(&self, url: &Url) -> Option<AuthAttachment> {
        if !self.orchestrator.should_attach(url) {
            return None;
        }

        let token = self.tokens.read_access_token().await;
        Some(AuthAttachment {
            header: token
                .as_deref()
                .map(|t| self.orchestrator.auth_header_value(t)),
            token,
        })
    }

    /// Header value for a token.
    pub fn header_value(&self, access_token: &str) -> String {
        self.orchestrator.auth_header_value(access_token)
    }

    /// Obtain fresh credentials after a request sent with `used_token` got a
    /// 401.
    pub async fn refresh_after_unauthorized(&self, used_token: Option<&str>) -> RefreshOutcome {
        let seen = self.completed.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        let current = self.tokens.read_access_token().await;
        if let Some(token) = current.as_deref()
            && Some(token) != used_token
        {
            debug!("Token already refreshed by another request");
            return RefreshOutcome::Retry(token.to_string());
        }

        if let Some(failed) = state.last_failure
            && failed > seen
        {
            debug!("Refresh failed while waiting");
            return RefreshOutcome::Failed;
        }

        let refresh_token = self.tokens.read_refresh_token().await;
        state.refreshes += 1;
        let refreshed = self.orchestrator.refresh(current, refresh_token).await;
        let completion = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        match refreshed {
            Some(pair) => {
                info!("Access token refreshed");
                self.tokens
                    .write_tokens(pair.access_token.clone(), pair.refresh_token)
                    .await;
                state.last_failure = None;
                RefreshOutcome::Retry(pair.access_token)
            }
            None => {
                warn!("Token refresh failed");
                state.last_failure = Some(completion);
                RefreshOutcome::Failed
            }
        }
    }

    /// Number of refresh calls issued so far.
    pub async fn refresh_count(&self) -> u64 {
        self.state.lock().await.refreshes
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingOrchestrator {
        calls: AtomicU32,
        succeed: bool,
    }

    #[async_trait]
    impl AuthOrchestrator for CountingOrchestrator {
        fn should_attach(&self, url: &Url) -> bool {
            !url.path().starts_with("/auth")
        }

        async fn refresh(
            &self,
            _access_token: Option<String>,
            refresh_token: Option<String>,
        ) -> Option<TokenPair> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.succeed && refresh_token.is_some() {
                Some(TokenPair::new(format!("access-{n}"), Some(format!("refresh-{n}"))))
            } else {
                None
            }
        }
    }

    fn coordinator(succeed: bool) -> (Arc<RefreshCoordinator>, Arc<CountingOrchestrator>) {
        let store = Arc::new(InMemoryTokenStore::with_tokens(TokenPair::new(
            "stale",
            Some("refresh-0".to_string()),
        )));
        let orchestrator = Arc::new(CountingOrchestrator {
            calls: AtomicU32::new(0),
            succeed,
        });
        (
            Arc::new(RefreshCoordinator::new(store, orchestrator.clone())),
            orchestrator,
        )
    }

    #[tokio::test]
    async fn test_attach_predicate() {
        let (coordinator, _) = coordinator(true);
        let api = Url::parse("https://api.example.com/users").unwrap();
        let login = Url::parse("https://api.example.com/auth/login").unwrap();

        let attachment = coordinator.attachment_for(&api).await.unwrap();
        assert_eq!(attachment.header.as_deref(), Some("Bearer stale"));
        assert_eq!(attachment.token.as_deref(), Some("stale"));
        assert!(coordinator.attachment_for(&login).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let (coordinator, orchestrator) = coordinator(true);

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.refresh_after_unauthorized(Some("stale")).await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(
                task.await.unwrap(),
                RefreshOutcome::Retry("access-1".to_string())
            );
        }
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            coordinator.tokens().read_refresh_token().await.as_deref(),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_is_not_repeated_for_waiters() {
        let (coordinator, orchestrator) = coordinator(false);

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.refresh_after_unauthorized(Some("stale")).await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), RefreshOutcome::Failed);
        }
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            coordinator.tokens().read_access_token().await.as_deref(),
            Some("stale")
        );
    }

    #[tokio::test]
    async fn test_later_unauthorized_retries_after_failed_refresh() {
        let (coordinator, orchestrator) = coordinator(false);
        assert_eq!(
            coordinator.refresh_after_unauthorized(Some("stale")).await,
            RefreshOutcome::Failed
        );
        assert_eq!(
            coordinator.refresh_after_unauthorized(Some("stale")).await,
            RefreshOutcome::Failed
        );

        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.refresh_count().await, 2);
    }

    #[tokio::test]
    async fn test_new_login_allows_refresh_again() {
        let (coordinator, orchestrator) = coordinator(false);
        assert_eq!(
            coordinator.refresh_after_unauthorized(Some("stale")).await,
            RefreshOutcome::Failed
        );

        coordinator
            .tokens()
            .write_tokens("fresh-login".to_string(), None)
            .await;
        coordinator.refresh_after_unauthorized(Some("fresh-login")).await;
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_memory_store_clear() {
        let store = InMemoryTokenStore::with_tokens(TokenPair::new("a", None));
        assert_eq!(store.read_access_token().await.as_deref(), Some("a"));
        store.clear().await;
        assert!(store.read_access_token().await.is_none());
        assert!(store.read_refresh_token().await.is_none());
    }
}
