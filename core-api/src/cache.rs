//! # Response Cache
//!
//! Two-tier cache for GET responses:
//!
//! - a bounded in-memory LRU for hot entries
//! - the durable [`KeyValueStore`] so cached data survives restarts
//!
//! Each entry is stored as a JSON-encoded [`CacheEntry`] under a readable key
//! (`@api_cache:GET <url>`), which lets invalidation match keys against a
//! URL regex. Expired entries are evicted lazily on read.
//!
//! ```text
//! get(url) ──> memory hit? ──no──> store hit? ──no──> None
//!                  │ yes                │ yes
//!                  v                    v
//!             still valid? ──no──> evict both tiers, None
//!                  │ yes
//!                  v
//!               Some(data)
//! ```

use crate::error::CacheError;
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::Clock;
use lru::LruCache;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Prefix shared by every cache key in the key-value store.
pub const CACHE_KEY_PREFIX: &str = "@api_cache:";

const GET_KEY_PREFIX: &str = "@api_cache:GET ";

/// Standard lifetimes, picked per data category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTtl {
    /// 5 minutes (dashboards)
    Short,
    /// 30 minutes
    Medium,
    /// 1 hour (profile)
    Long,
    /// 24 hours (preferences)
    Day,
    /// 7 days (mood and journal history)
    Week,
}

impl CacheTtl {
    pub fn duration(self) -> Duration {
        match self {
            CacheTtl::Short => Duration::from_secs(5 * 60),
            CacheTtl::Medium => Duration::from_secs(30 * 60),
            CacheTtl::Long => Duration::from_secs(60 * 60),
            CacheTtl::Day => Duration::from_secs(24 * 60 * 60),
            CacheTtl::Week => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// How a GET interacts with the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Serve a fresh hit, otherwise fetch and store
    #[default]
    Use,
    /// Always fetch, then store the new response
    Refresh,
    /// Neither read nor write the cache
    Bypass,
}

impl CacheMode {
    pub fn reads(self) -> bool {
        self == CacheMode::Use
    }

    pub fn writes(self) -> bool {
        self != CacheMode::Bypass
    }
}

/// Cached value with its write time and optional expiry (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, now_ms: i64, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| {
            now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
        });
        Self {
            data,
            timestamp: now_ms,
            expires_at,
        }
    }

    /// An entry without expiry never goes stale.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(true, |expires_at| now_ms < expires_at)
    }
}

impl<T: Serialize> CacheEntry<T> {
    pub fn encode(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Storage key for a GET of `url`.
pub fn cache_key(url: &str) -> String {
    format!("{}{}", GET_KEY_PREFIX, url)
}

/// URL prefix whose cached reads a mutation of `url` makes stale: the URL
/// without query, fragment and last path segment.
///
/// `https://api/mood/entries/123` gives `https://api/mood/entries`.
pub fn resource_prefix(url: &str) -> &str {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    let trimmed = url[..end].trim_end_matches('/');

    let path_start = match trimmed.find("://") {
        Some(scheme_end) => trimmed[scheme_end + 3..]
            .find('/')
            .map(|offset| scheme_end + 3 + offset),
        None => trimmed.find('/'),
    };

    match (trimmed.rfind('/'), path_start) {
        (Some(last), Some(start)) if last >= start => &trimmed[..last],
        _ => trimmed,
    }
}

/// Two-tier GET response cache.
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    memory: Mutex<LruCache<String, CacheEntry<Value>>>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, memory_capacity: NonZeroUsize) -> Self {
        Self {
            store,
            memory: Mutex::new(LruCache::new(memory_capacity)),
            clock,
        }
    }

    /// Returns the cached value for `url` when present and fresh.
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, CacheError> {
        match self.get_value(url).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn get_value(&self, url: &str) -> Result<Option<Value>, CacheError> {
        let key = cache_key(url);
        let now = self.clock.unix_timestamp_millis();

        let in_memory = self.memory.lock().await.get(&key).cloned();
        let entry = match in_memory {
            Some(entry) => entry,
            None => {
                let Some(raw) = self.store.get(&key).await? else {
                    return Ok(None);
                };
                match CacheEntry::<Value>::decode(&raw) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Discarding undecodable cache entry");
                        self.store.remove(&key).await?;
                        return Ok(None);
                    }
                }
            }
        };

        if !entry.is_valid(now) {
            debug!(url = %url, "Cache entry expired");
            self.memory.lock().await.pop(&key);
            self.store.remove(&key).await?;
            return Ok(None);
        }

        debug!(url = %url, "Cache hit");
        let data = entry.data.clone();
        self.memory.lock().await.put(key, entry);
        Ok(Some(data))
    }

    /// Caches `data` for `url` in both tiers. `None` TTL never expires.
    pub async fn set<T: Serialize>(&self, url: &str, data: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        let key = cache_key(url);
        let entry = CacheEntry::new(
            serde_json::to_value(data)?,
            self.clock.unix_timestamp_millis(),
            ttl,
        );

        self.store.set(&key, &entry.encode()?).await?;
        self.memory.lock().await.put(key, entry);
        Ok(())
    }

    /// Removes every entry whose URL matches `pattern`. Returns how many
    /// entries were removed from the durable tier.
    pub async fn invalidate_pattern(&self, pattern: &Regex) -> Result<usize, CacheError> {
        let stale: Vec<String> = self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| {
                key.strip_prefix(GET_KEY_PREFIX)
                    .is_some_and(|url| pattern.is_match(url))
            })
            .collect();

        {
            let mut memory = self.memory.lock().await;
            let stale_in_memory: Vec<String> = memory
                .iter()
                .filter_map(|(key, _)| {
                    key.strip_prefix(GET_KEY_PREFIX)
                        .filter(|url| pattern.is_match(url))
                        .map(|_| key.clone())
                })
                .collect();
            for key in stale_in_memory {
                memory.pop(&key);
            }
        }

        if !stale.is_empty() {
            self.store.remove_many(&stale).await?;
        }

        debug!(pattern = %pattern, removed = stale.len(), "Cache invalidated");
        Ok(stale.len())
    }

    /// Invalidates cached reads under the resource a mutation of `url` touched.
    pub async fn invalidate_for_mutation(&self, url: &str) -> Result<usize, CacheError> {
        let prefix = resource_prefix(url);
        let pattern = Regex::new(&format!("^{}", regex::escape(prefix)))?;
        self.invalidate_pattern(&pattern).await
    }

    /// Drops every cached response.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let keys: Vec<String> = self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(CACHE_KEY_PREFIX))
            .collect();

        self.memory.lock().await.clear();
        if !keys.is_empty() {
            self.store.remove_many(&keys).await?;
        }
        Ok(())
    }
}
