//! Storage Abstractions
//!
//! Provides platform-agnostic traits for durable key-value storage and secure
//! credential storage.

use async_trait::async_trait;

use crate::error::Result;

/// Durable key-value storage trait
///
/// Backs the response cache and the offline sync queue. All values are
/// JSON-serialized strings; the store itself never interprets them.
///
/// Abstracts platform-specific storage:
/// - iOS: UserDefaults / file-backed store
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite table
/// - Web: localStorage / IndexedDB
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember_last_sync(store: &dyn KeyValueStore, at: i64) -> Result<()> {
///     store.set("@last_sync", &at.to_string()).await
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value, `Ok(None)` if the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, overwriting any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove several values at once
    ///
    /// The default implementation removes keys one by one. Stores with a
    /// native batch operation should override it.
    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }

    /// List every key currently stored
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// Secure credential storage trait
///
/// Abstracts secure storage mechanisms:
/// - macOS/iOS: Keychain
/// - Android: Keystore (hardware-backed when available)
/// - Windows: DPAPI
/// - Linux: Secret Service / libsecret
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Encrypt data at rest
/// - Use platform-provided secure storage when available
/// - Never log or expose sensitive data
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing the previous value if it exists
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}
