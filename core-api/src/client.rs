//! # Authenticated Request Orchestrator
//!
//! [`ApiClient`] is the single entry point for backend calls. One call runs:
//!
//! ```text
//! GET, first attempt, CacheMode::Use ──> cache hit? ──yes──> return
//!                                            │ no
//!                                            v
//!            attach bearer token ──> ResilientFetch ──> 401 + refresh token?
//!                                                           │ yes
//!                                                           v
//!                                   TokenRefreshCoordinator ──> replay once
//!                                                           │
//!                          non-2xx ──> ApiError ──> error interceptors
//!                          2xx     ──> decode ──> GET: write through cache
//!                                                 mutation: invalidate prefix
//! ```
//!
//! Any `ApiError` that [`RetryPolicy::should_retry`] accepts is retried after
//! a jittered backoff, which a caller's cancellation token can cut short.

use crate::backoff::RetryPolicy;
use crate::cache::{CacheMode, CacheTtl, ResponseCache};
use crate::error::{ApiError, ErrorKind, Result};
use crate::fetch::ResilientFetch;
use crate::interceptor::{InterceptorPipeline, RequestDescriptor, ResponseEnvelope, RETRY_COUNT_KEY};
use bridge_traits::http::{HttpClient, HttpMethod};
use bridge_traits::storage::{KeyValueStore, SecureStore};
use bridge_traits::time::{Clock, SystemClock};
use core_auth::{AuthError, AuthTokens, TokenRefreshCoordinator, TokenStore};
use core_runtime::config::ApiConfig;
use core_runtime::events::EventBus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub cache: CacheMode,
    /// Lifetime of the cached response; the configured default when `None`
    pub cache_ttl: Option<CacheTtl>,
    /// Overrides the configured request timeout
    pub timeout: Option<Duration>,
    pub cancel_token: Option<CancellationToken>,
    /// Sends no bearer token and treats a 401 as a plain client error
    pub anonymous: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.cache = mode;
        self
    }

    pub fn cache_ttl(mut self, ttl: CacheTtl) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// For credential endpoints, which never use the stored session.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// Authenticated, retrying, caching API client.
///
/// Cheap to clone; clones share the cache, the refresh coordinator and the
/// event bus.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ApiConfig>,
    fetch: ResilientFetch,
    cache: Arc<ResponseCache>,
    refresh: Arc<TokenRefreshCoordinator>,
    retry: RetryPolicy,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl ApiClient {
    pub fn builder(config: ApiConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn token_store(&self) -> &TokenStore {
        self.refresh.token_store()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Calls `path` (relative to the base URL, or absolute) and returns the
    /// decoded JSON body.
    #[instrument(skip(self, options), fields(method = %method, path = %path))]
    pub async fn authenticated_fetch(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value> {
        let url = self.config.endpoint(path);
        let mut retry_count = 0;

        loop {
            match self.attempt(method, &url, &options, retry_count).await {
                Ok(value) => return Ok(value),
                Err(error) if self.retry.should_retry(method, &error, retry_count) => {
                    let delay = self.retry.delay_for(retry_count);
                    warn!(
                        url = %url,
                        attempt = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying request"
                    );
                    self.backoff(delay, &url, options.cancel_token.as_ref())
                        .await?;
                    retry_count += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Like [`authenticated_fetch`](Self::authenticated_fetch), decoding the
    /// body into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.authenticated_fetch(method, path, options).await?;
        serde_json::from_value(value).map_err(|e| {
            ApiError::decode(
                self.config.endpoint(path),
                format!("Unexpected response body: {}", e),
            )
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        self.request(HttpMethod::Get, path, options).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let options = self.json_options(path, body)?;
        self.request(HttpMethod::Post, path, options).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let options = self.json_options(path, body)?;
        self.request(HttpMethod::Put, path, options).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let options = self.json_options(path, body)?;
        self.request(HttpMethod::Patch, path, options).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(HttpMethod::Delete, path, RequestOptions::default())
            .await
    }

    /// Options carrying `body` encoded as JSON.
    pub fn json_options<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<RequestOptions> {
        let body = serde_json::to_value(body).map_err(|e| {
            ApiError::decode(
                self.config.endpoint(path),
                format!("Failed to encode request body: {}", e),
            )
        })?;
        Ok(RequestOptions::default().body(body))
    }

    async fn attempt(
        &self,
        method: HttpMethod,
        url: &str,
        options: &RequestOptions,
        retry_count: u32,
    ) -> Result<Value> {
        let is_get = method == HttpMethod::Get;

        if is_get && retry_count == 0 && options.cache.reads() {
            match self.cache.get::<Value>(url).await {
                Ok(Some(hit)) => return Ok(hit),
                Ok(None) => {}
                Err(e) => warn!(url = %url, error = %e, "Cache read failed"),
            }
        }

        let tokens = if options.anonymous {
            None
        } else {
            match self.refresh.token_store().get_tokens().await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(error = %e, "Could not read stored tokens, sending without credentials");
                    None
                }
            }
        };

        let mut response = self
            .send(method, url, options, retry_count, tokens.as_ref())
            .await?;

        if response.status_code == 401 {
            if let Some(rejected) = tokens.as_ref().filter(|t| t.refresh_token.is_some()) {
                debug!(url = %url, "Access token rejected, refreshing");
                let fresh = match self.refresh.refresh(rejected).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        let error = auth_failure(e, url);
                        return Err(self.fetch.pipeline().run_error(error).await);
                    }
                };
                response = self
                    .send(method, url, options, retry_count, Some(&fresh))
                    .await?;
            }
        }

        if !response.is_success() {
            let error = ApiError::from_status(response.status_code, response.error_message(), url);
            return Err(self.fetch.pipeline().run_error(error).await);
        }

        let value: Value = response
            .json()
            .map_err(|e| ApiError::decode(url, format!("Invalid JSON response: {}", e)))?;

        if is_get {
            if options.cache.writes() {
                let ttl = options
                    .cache_ttl
                    .map(CacheTtl::duration)
                    .unwrap_or(self.config.default_cache_ttl);
                if let Err(e) = self.cache.set(url, &value, Some(ttl)).await {
                    warn!(url = %url, error = %e, "Cache write failed");
                }
            }
        } else if method.is_mutation() {
            if let Err(e) = self.cache.invalidate_for_mutation(url).await {
                warn!(url = %url, error = %e, "Cache invalidation failed");
            }
        }

        Ok(value)
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        options: &RequestOptions,
        retry_count: u32,
        tokens: Option<&AuthTokens>,
    ) -> Result<ResponseEnvelope> {
        let mut request =
            RequestDescriptor::new(method, url).with_metadata(RETRY_COUNT_KEY, retry_count);
        for (key, value) in &options.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.json_body(body).map_err(|e| {
                ApiError::decode(url, format!("Failed to encode request body: {}", e))
            })?;
        }
        if let Some(tokens) = tokens {
            request = request.header("Authorization", format!("Bearer {}", tokens.access_token));
        }

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        self.fetch
            .fetch(request, timeout, options.cancel_token.as_ref())
            .await
    }

    async fn backoff(&self, delay: Duration, url: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ApiError::cancelled(url)),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Converts a session failure into the error callers see.
pub(crate) fn auth_failure(error: AuthError, url: &str) -> ApiError {
    match error {
        AuthError::SessionExpired { reason } => ApiError::auth_expired(url, reason),
        other => ApiError::new(ErrorKind::Transport, other.to_string(), url),
    }
}

/// Assembles an [`ApiClient`] from configuration and host bridges.
pub struct ApiClientBuilder {
    config: ApiConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
    pipeline: Option<InterceptorPipeline>,
}

impl ApiClientBuilder {
    fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http_client: None,
            key_value_store: None,
            secure_store: None,
            clock: None,
            event_bus: None,
            pipeline: None,
        }
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Durable tier of the response cache.
    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    /// Where session tokens are kept.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a new bus sized by `event_buffer_size`.
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Defaults to the built-in logging interceptors.
    pub fn pipeline(mut self, pipeline: InterceptorPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> core_runtime::Result<ApiClient> {
        self.config.validate()?;

        let http_client = self
            .http_client
            .ok_or_else(|| missing("HttpClient", "http_client"))?;
        let key_value_store = self
            .key_value_store
            .ok_or_else(|| missing("KeyValueStore", "key_value_store"))?;
        let secure_store = self
            .secure_store
            .ok_or_else(|| missing("SecureStore", "secure_store"))?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(self.config.event_buffer_size));
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| InterceptorPipeline::builder().with_default_logging().build());
        let capacity = NonZeroUsize::new(self.config.memory_cache_capacity).ok_or_else(|| {
            core_runtime::Error::Config("memory_cache_capacity must be greater than zero".into())
        })?;

        let refresh = TokenRefreshCoordinator::from_config(
            &self.config,
            http_client.clone(),
            TokenStore::new(secure_store),
            clock.clone(),
            event_bus.clone(),
        );

        Ok(ApiClient {
            retry: RetryPolicy::from_config(&self.config),
            fetch: ResilientFetch::new(http_client, pipeline),
            cache: Arc::new(ResponseCache::new(key_value_store, clock.clone(), capacity)),
            refresh: Arc::new(refresh),
            event_bus,
            clock,
            config: Arc::new(self.config),
        })
    }
}

fn missing(capability: &str, setter: &str) -> core_runtime::Error {
    core_runtime::Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!("call ApiClientBuilder::{}() before build()", setter),
    }
}
