//! Shared doubles for the API integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{KeyValueStore, SecureStore};
use core_api::ApiClient;
use core_runtime::config::ApiConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_URL: &str = "https://api.test";

// ============================================================================
// Transport
// ============================================================================

type Handler = Box<dyn Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync>;

/// HTTP double answering every request with `handler` after `latency`,
/// recording what it received.
pub struct ScriptedServer {
    handler: Handler,
    latency: Duration,
    received: Mutex<Vec<HttpRequest>>,
}

impl ScriptedServer {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests whose URL ends with `path`.
    pub fn calls_to(&self, method: HttpMethod, path: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.method == method && request.url.ends_with(path))
            .count()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.received.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpClient for ScriptedServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.received.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.handler)(&request)
    }
}

pub fn json(status: u16, body: &str) -> BridgeResult<HttpResponse> {
    Ok(HttpResponse::new(status, body.to_string()))
}

pub fn path_of(request: &HttpRequest) -> &str {
    request.url.strip_prefix(BASE_URL).unwrap_or(&request.url)
}

pub fn bearer(request: &HttpRequest) -> Option<&str> {
    request
        .headers
        .get("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemorySecureStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }
}

pub fn unreachable() -> BridgeResult<HttpResponse> {
    Err(BridgeError::Network("connection refused".to_string()))
}

// ============================================================================
// Client
// ============================================================================

pub fn test_config() -> ApiConfig {
    ApiConfig::builder()
        .base_url(BASE_URL)
        .retry_delays(Duration::from_millis(1), Duration::from_millis(10))
        .build()
        .unwrap()
}

pub fn client_for(server: Arc<ScriptedServer>) -> ApiClient {
    client_with_config(server, test_config())
}

pub fn client_with_config(server: Arc<ScriptedServer>, config: ApiConfig) -> ApiClient {
    ApiClient::builder(config)
        .http_client(server)
        .key_value_store(Arc::new(MemoryStore::default()))
        .secure_store(Arc::new(MemorySecureStore::default()))
        .build()
        .unwrap()
}
