//! Token Refresh Coordination
//!
//! Turns any number of concurrent 401 responses that carry the same refresh
//! token into a single call to the refresh endpoint, and caps how many
//! refresh calls one token may trigger within a time window.
//!
//! ## Flow
//!
//! ```text
//! 401 ──> lock(hash(refresh_token)) ──> tokens changed meanwhile? ──yes──> reuse them
//!                                              │ no
//!                                              v
//!                                   attempt budget left? ──no──> clear tokens, SessionExpired
//!                                              │ yes
//!                                              v
//!                               POST /auth/refresh ──fail──> clear tokens, SessionExpired
//!                                              │ ok
//!                                              v
//!                                store tokens, reset budget, return new tokens
//! ```
//!
//! Per-token state is keyed by [`refresh_token_key`], never by the raw token.

use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{refresh_token_key, AuthTokens, TokenResponse};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::time::Clock;
use core_runtime::config::ApiConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Path of the refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Limits applied to refresh calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh calls allowed per token within `window`
    pub max_attempts: u32,
    pub window: Duration,
    /// Bound on a single refresh round trip
    pub timeout: Duration,
}

impl RefreshPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.max_refresh_attempts,
            window: config.refresh_attempt_window,
            timeout: config.request_timeout,
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            window: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    count: u32,
    first_attempt_at_ms: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Single-flight token refresher with a per-token attempt budget.
pub struct TokenRefreshCoordinator {
    http_client: Arc<dyn HttpClient>,
    token_store: TokenStore,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    refresh_url: String,
    policy: RefreshPolicy,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    attempts: Mutex<HashMap<String, AttemptRecord>>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        token_store: TokenStore,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        refresh_url: impl Into<String>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            http_client,
            token_store,
            clock,
            event_bus,
            refresh_url: refresh_url.into(),
            policy,
            refresh_locks: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a coordinator targeting `{base_url}/auth/refresh`.
    pub fn from_config(
        config: &ApiConfig,
        http_client: Arc<dyn HttpClient>,
        token_store: TokenStore,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self::new(
            http_client,
            token_store,
            clock,
            event_bus,
            config.endpoint(REFRESH_PATH),
            RefreshPolicy::from_config(config),
        )
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    /// Obtains fresh tokens after `rejected` was answered with a 401.
    ///
    /// Concurrent callers holding the same refresh token wait for the first
    /// one and then reuse the tokens it stored, so at most one refresh call
    /// is in flight per token.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] when there is no refresh token, the
    /// attempt budget is exhausted, or the refresh call fails. In the last
    /// two cases stored tokens are cleared first.
    #[instrument(skip(self, rejected))]
    pub async fn refresh(&self, rejected: &AuthTokens) -> Result<AuthTokens> {
        let Some(refresh_token) = rejected.refresh_token.as_deref() else {
            return Err(AuthError::expired("no refresh token available"));
        };

        let key = refresh_token_key(refresh_token);
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock().await;
            self.refresh_exclusive(&key, rejected, refresh_token).await
        };

        // Map entry plus our clone: nobody else is waiting on this key.
        let mut locks = self.refresh_locks.lock().await;
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&key);
        }

        result
    }

    async fn refresh_exclusive(
        &self,
        key: &str,
        rejected: &AuthTokens,
        refresh_token: &str,
    ) -> Result<AuthTokens> {
        match self.token_store.get_tokens().await? {
            None => return Err(AuthError::expired("stored tokens were cleared")),
            Some(current) if current != *rejected => {
                debug!("Tokens already refreshed by a concurrent request");
                return Ok(current);
            }
            Some(_) => {}
        }

        if !self.consume_attempt(key).await {
            warn!(
                max_attempts = self.policy.max_attempts,
                window_secs = self.policy.window.as_secs(),
                "Refresh attempt budget exhausted"
            );
            return Err(self.expire_session("refresh attempt budget exhausted").await);
        }

        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::TokenRefreshing));

        match self.request_new_tokens(refresh_token).await {
            Ok(tokens) => {
                self.token_store.store_tokens(&tokens).await?;
                self.attempts.lock().await.remove(key);

                let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshed {
                    expires_at: tokens.expires_at,
                }));
                info!(expires_at = ?tokens.expires_at, "Access token refreshed");
                Ok(tokens)
            }
            Err(reason) => {
                warn!(reason = %reason, "Token refresh failed");
                Err(self.expire_session(&reason).await)
            }
        }
    }

    /// Records one refresh attempt for `key`. Returns `false` when the
    /// budget for the current window is already spent; the record is
    /// dropped in that case so a later sign-in starts from zero.
    async fn consume_attempt(&self, key: &str) -> bool {
        let now = self.clock.unix_timestamp_millis();
        let window_ms = i64::try_from(self.policy.window.as_millis()).unwrap_or(i64::MAX);

        let mut attempts = self.attempts.lock().await;
        attempts.retain(|_, record| now - record.first_attempt_at_ms <= window_ms);

        match attempts.get_mut(key) {
            Some(record) if record.count >= self.policy.max_attempts => {
                attempts.remove(key);
                false
            }
            Some(record) => {
                record.count += 1;
                debug!(attempt = record.count, "Refresh attempt recorded");
                true
            }
            None => {
                attempts.insert(
                    key.to_string(),
                    AttemptRecord {
                        count: 1,
                        first_attempt_at_ms: now,
                    },
                );
                true
            }
        }
    }

    async fn request_new_tokens(&self, refresh_token: &str) -> std::result::Result<AuthTokens, String> {
        let request = HttpRequest::new(HttpMethod::Post, self.refresh_url.clone())
            .json(&RefreshRequest { refresh_token })
            .map_err(|e| format!("failed to encode refresh request: {}", e))?
            .timeout(self.policy.timeout);

        let response = match timeout(self.policy.timeout, self.http_client.execute(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(format!("refresh request failed: {}", e)),
            Err(_) => return Err("refresh request timed out".to_string()),
        };

        if !response.is_success() {
            return Err(format!("refresh endpoint returned {}", response.status));
        }

        let body: TokenResponse = response
            .json()
            .map_err(|e| format!("invalid refresh response: {}", e))?;

        Ok(body.into_tokens(self.clock.unix_timestamp(), Some(refresh_token)))
    }

    async fn expire_session(&self, reason: &str) -> AuthError {
        if let Err(e) = self.token_store.clear_tokens().await {
            warn!(error = %e, "Failed to clear tokens after session expiry");
        }

        let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::SessionExpired {
            reason: reason.to_string(),
        }));

        AuthError::expired(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use bridge_traits::storage::SecureStore;
    use bridge_traits::time::ManualClock;
    use chrono::TimeZone;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        pub Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    #[derive(Default)]
    struct MemorySecureStore {
        storage: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SecureStore for MemorySecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.storage
                .lock()
                .await
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.storage.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.storage.lock().await.remove(key);
            Ok(())
        }
    }

    /// Answers every refresh with new tokens after a short delay.
    #[derive(Default)]
    struct SlowRefreshServer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for SlowRefreshServer {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            assert!(request.url.ends_with(REFRESH_PATH));
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let body = format!(
                r#"{{"accessToken":"access-{}","refreshToken":"refresh-{}","expiresIn":3600}}"#,
                n, n
            );
            Ok(HttpResponse::new(200, body))
        }
    }

    fn old_tokens() -> AuthTokens {
        AuthTokens::new("access-0", Some("refresh-0".to_string()), Some(0))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn coordinator(
        http: Arc<dyn HttpClient>,
        clock: Arc<ManualClock>,
        event_bus: EventBus,
    ) -> TokenRefreshCoordinator {
        TokenRefreshCoordinator::new(
            http,
            TokenStore::new(Arc::new(MemorySecureStore::default())),
            clock,
            event_bus,
            "https://api.example.com/auth/refresh",
            RefreshPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_successful_refresh_stores_tokens() {
        let server = Arc::new(SlowRefreshServer::default());
        let event_bus = EventBus::new(16);
        let mut events = event_bus.subscribe();
        let coordinator = coordinator(server.clone(), clock(), event_bus);
        coordinator.token_store().store_tokens(&old_tokens()).await.unwrap();

        let tokens = coordinator.refresh(&old_tokens()).await.unwrap();

        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(
            coordinator.token_store().get_tokens().await.unwrap(),
            Some(tokens)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::TokenRefreshing)
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::TokenRefreshed { expires_at: Some(_) })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let server = Arc::new(SlowRefreshServer::default());
        let coordinator = Arc::new(coordinator(server.clone(), clock(), EventBus::new(16)));
        coordinator.token_store().store_tokens(&old_tokens()).await.unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.refresh(&old_tokens()).await })
            })
            .collect();

        for handle in handles {
            let tokens = handle.await.unwrap().unwrap();
            assert_eq!(tokens.access_token, "access-1");
        }

        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.refresh_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_tokens() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(401, r#"{"message":"revoked"}"#)));

        let event_bus = EventBus::new(16);
        let mut events = event_bus.subscribe();
        let coordinator = coordinator(Arc::new(http), clock(), event_bus);
        coordinator.token_store().store_tokens(&old_tokens()).await.unwrap();

        let err = coordinator.refresh(&old_tokens()).await.unwrap_err();

        assert!(err.is_session_expired());
        assert_eq!(coordinator.token_store().get_tokens().await.unwrap(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::TokenRefreshing)
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SessionExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_expires_session() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Network("connection reset".to_string())));

        let coordinator = coordinator(Arc::new(http), clock(), EventBus::new(16));
        coordinator.token_store().store_tokens(&old_tokens()).await.unwrap();

        let err = coordinator.refresh(&old_tokens()).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired { ref reason } if reason.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_short_circuits() {
        let mut http = MockHttp::new();
        // Only the first two attempts may reach the network.
        http.expect_execute()
            .times(2)
            .returning(|_| Ok(HttpResponse::new(500, "")));

        let coordinator = coordinator(Arc::new(http), clock(), EventBus::new(16));
        let store = coordinator.token_store().clone();

        for _ in 0..2 {
            store.store_tokens(&old_tokens()).await.unwrap();
            assert!(coordinator.refresh(&old_tokens()).await.is_err());
        }

        store.store_tokens(&old_tokens()).await.unwrap();
        let err = coordinator.refresh(&old_tokens()).await.unwrap_err();

        assert!(matches!(err, AuthError::SessionExpired { ref reason } if reason.contains("budget")));
        assert_eq!(store.get_tokens().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_budget_resets_after_window() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(3)
            .returning(|_| Ok(HttpResponse::new(503, "")));

        let clock = clock();
        let coordinator = coordinator(Arc::new(http), clock.clone(), EventBus::new(16));
        let store = coordinator.token_store().clone();

        for _ in 0..2 {
            store.store_tokens(&old_tokens()).await.unwrap();
            assert!(coordinator.refresh(&old_tokens()).await.is_err());
        }

        clock.advance(chrono::Duration::seconds(61));

        store.store_tokens(&old_tokens()).await.unwrap();
        let err = coordinator.refresh(&old_tokens()).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired { ref reason } if reason.contains("503")));
    }

    #[tokio::test]
    async fn test_no_refresh_token_skips_network() {
        let mut http = MockHttp::new();
        http.expect_execute().times(0);

        let coordinator = coordinator(Arc::new(http), clock(), EventBus::new(16));
        let tokens = AuthTokens::new("access", None, None);

        let err = coordinator.refresh(&tokens).await.unwrap_err();
        assert!(err.is_session_expired());
    }

    #[tokio::test]
    async fn test_cleared_tokens_skip_network() {
        let mut http = MockHttp::new();
        http.expect_execute().times(0);

        let coordinator = coordinator(Arc::new(http), clock(), EventBus::new(16));

        let err = coordinator.refresh(&old_tokens()).await.unwrap_err();
        assert!(err.is_session_expired());
    }
}
