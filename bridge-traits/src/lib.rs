//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the API access layer and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform
//! (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - One async HTTP round trip per call
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity detection
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable JSON-string storage for cache and sync queue
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report transport timeouts as `BridgeError::Timeout` and connection
//!   failures as `BridgeError::Network` so callers can classify them
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus};
pub use storage::{KeyValueStore, SecureStore};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
