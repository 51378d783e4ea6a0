//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` using a SQLite table via `sqlx`
//! - `SecureStore` using the `keyring` crate
//! - `NetworkMonitor` using a TCP reachability probe
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let store = SqliteKeyValueStore::new("/path/to/solace.db".into()).await?;
//!     // Hand both to core-service
//!     Ok(())
//! }
//! ```

mod http;
mod kv_store;
mod network;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use kv_store::SqliteKeyValueStore;
pub use network::DesktopNetworkMonitor;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
