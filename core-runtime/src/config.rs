//! # API Configuration
//!
//! `ApiConfig` holds the tunables of the authenticated API layer: where the
//! backend lives, how long a request may take, how retries back off, how many
//! refresh attempts are allowed per window and how long cached reads stay fresh.
//!
//! The builder validates eagerly so a misconfigured client fails at startup
//! with an actionable message instead of misbehaving on the first request.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::ApiConfig;
//! use std::time::Duration;
//!
//! let config = ApiConfig::builder()
//!     .base_url("https://api.example.com/v1")
//!     .request_timeout(Duration::from_secs(10))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.max_retry_attempts, 3);
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_REFRESH_ATTEMPTS: u32 = 2;
pub const DEFAULT_REFRESH_ATTEMPT_WINDOW: Duration = Duration::from_secs(60);
/// Same value as the `Medium` cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_SYNC_MAX_RETRIES: u32 = 3;

/// Validated configuration for the API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Backend root, without trailing slash (e.g. `https://api.example.com/v1`)
    pub base_url: String,
    pub request_timeout: Duration,
    /// Automatic retries for idempotent reads (mutations are never retried)
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Refresh calls allowed per refresh token within `refresh_attempt_window`
    pub max_refresh_attempts: u32,
    pub refresh_attempt_window: Duration,
    /// TTL applied to cached reads that do not pick one
    pub default_cache_ttl: Duration,
    pub memory_cache_capacity: usize,
    /// Failed replays after which a queued mutation is dropped
    pub sync_max_retries: u32,
    pub event_buffer_size: usize,
}

impl ApiConfig {
    pub fn builder() -> ApiConfigBuilder {
        ApiConfigBuilder::default()
    }

    /// Joins `path` onto the base URL. Absolute URLs are returned unchanged.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(Error::Config(format!(
                "Retry base delay ({}ms) exceeds retry max delay ({}ms)",
                self.retry_base_delay.as_millis(),
                self.retry_max_delay.as_millis()
            )));
        }

        if self.max_refresh_attempts == 0 {
            return Err(Error::Config(
                "Max refresh attempts must be at least 1, otherwise every 401 ends the session"
                    .to_string(),
            ));
        }

        if self.refresh_attempt_window.is_zero() {
            return Err(Error::Config(
                "Refresh attempt window must be greater than zero".to_string(),
            ));
        }

        if self.memory_cache_capacity == 0 {
            return Err(Error::Config(
                "Memory cache capacity must be greater than 0 entries".to_string(),
            ));
        }

        if self.sync_max_retries == 0 {
            return Err(Error::Config(
                "Sync max retries must be at least 1".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`ApiConfig`].
#[derive(Debug, Default)]
pub struct ApiConfigBuilder {
    base_url: Option<String>,
    request_timeout: Option<Duration>,
    max_retry_attempts: Option<u32>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    max_refresh_attempts: Option<u32>,
    refresh_attempt_window: Option<Duration>,
    default_cache_ttl: Option<Duration>,
    memory_cache_capacity: Option<usize>,
    sync_max_retries: Option<u32>,
    event_buffer_size: Option<usize>,
}

impl ApiConfigBuilder {
    /// Sets the backend root URL (required). A trailing slash is stripped.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = Some(attempts);
        self
    }

    pub fn retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = Some(base);
        self.retry_max_delay = Some(max);
        self
    }

    pub fn max_refresh_attempts(mut self, attempts: u32) -> Self {
        self.max_refresh_attempts = Some(attempts);
        self
    }

    pub fn refresh_attempt_window(mut self, window: Duration) -> Self {
        self.refresh_attempt_window = Some(window);
        self
    }

    pub fn default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = Some(ttl);
        self
    }

    pub fn memory_cache_capacity(mut self, entries: usize) -> Self {
        self.memory_cache_capacity = Some(entries);
        self
    }

    pub fn sync_max_retries(mut self, retries: u32) -> Self {
        self.sync_max_retries = Some(retries);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the base URL is missing or any value
    /// is out of range.
    pub fn build(self) -> Result<ApiConfig> {
        let base_url = self.base_url.ok_or_else(|| {
            Error::Config("Base URL is required. Use .base_url() to set it.".to_string())
        })?;

        let config = ApiConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_retry_attempts: self
                .max_retry_attempts
                .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS),
            retry_base_delay: self.retry_base_delay.unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            retry_max_delay: self.retry_max_delay.unwrap_or(DEFAULT_RETRY_MAX_DELAY),
            max_refresh_attempts: self
                .max_refresh_attempts
                .unwrap_or(DEFAULT_MAX_REFRESH_ATTEMPTS),
            refresh_attempt_window: self
                .refresh_attempt_window
                .unwrap_or(DEFAULT_REFRESH_ATTEMPT_WINDOW),
            default_cache_ttl: self.default_cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
            memory_cache_capacity: self
                .memory_cache_capacity
                .unwrap_or(DEFAULT_MEMORY_CACHE_CAPACITY),
            sync_max_retries: self.sync_max_retries.unwrap_or(DEFAULT_SYNC_MAX_RETRIES),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ApiConfigBuilder {
        ApiConfig::builder().base_url("https://api.example.com/v1")
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(1000));
        assert_eq!(config.retry_max_delay, Duration::from_millis(30000));
        assert_eq!(config.max_refresh_attempts, 2);
        assert_eq!(config.refresh_attempt_window, Duration::from_secs(60));
        assert_eq!(config.default_cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.memory_cache_capacity, 256);
        assert_eq!(config.sync_max_retries, 3);
        assert_eq!(config.event_buffer_size, 100);
    }

    #[test]
    fn test_builder_requires_base_url() {
        let result = ApiConfig::builder().build();
        match result {
            Err(Error::Config(message)) => assert!(message.contains(".base_url()")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = ApiConfig::builder().base_url("ftp://example.com").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = ApiConfig::builder()
            .base_url("http://localhost:3000/api/")
            .build()
            .unwrap();
        assert_eq!(config.base_url, "http://localhost:3000/api");
    }

    #[test]
    fn test_endpoint_joining() {
        let config = base().build().unwrap();

        assert_eq!(
            config.endpoint("/mood/entries"),
            "https://api.example.com/v1/mood/entries"
        );
        assert_eq!(
            config.endpoint("auth/login"),
            "https://api.example.com/v1/auth/login"
        );
        assert_eq!(
            config.endpoint("https://cdn.example.com/x"),
            "https://cdn.example.com/x"
        );
    }

    #[test]
    fn test_rejects_inverted_retry_delays() {
        let result = base()
            .retry_delays(Duration::from_secs(10), Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(base().request_timeout(Duration::ZERO).build().is_err());
        assert!(base().max_refresh_attempts(0).build().is_err());
        assert!(base().refresh_attempt_window(Duration::ZERO).build().is_err());
        assert!(base().memory_cache_capacity(0).build().is_err());
        assert!(base().sync_max_retries(0).build().is_err());
        assert!(base().event_buffer_size(0).build().is_err());
    }

    #[test]
    fn test_zero_retry_attempts_is_allowed() {
        let config = base().max_retry_attempts(0).build().unwrap();
        assert_eq!(config.max_retry_attempts, 0);
    }

    #[test]
    fn test_custom_values() {
        let config = base()
            .request_timeout(Duration::from_secs(5))
            .retry_delays(Duration::from_millis(10), Duration::from_millis(100))
            .max_refresh_attempts(4)
            .default_cache_ttl(Duration::from_secs(60))
            .build()
            .unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
        assert_eq!(config.retry_max_delay, Duration::from_millis(100));
        assert_eq!(config.max_refresh_attempts, 4);
        assert_eq!(config.default_cache_ttl, Duration::from_secs(60));
    }
}
