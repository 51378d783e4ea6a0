//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, error};

const DEFAULT_SERVICE: &str = "solace-core";

/// Keyring-backed [`SecureStore`] used for the session token pair.
///
/// Values are base64-encoded because the keyring only stores strings.
/// Platform backends:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(e: keyring::Error) -> BridgeError {
    BridgeError::Storage(format!("Keyring error: {}", e))
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&STANDARD.encode(value))
            .map_err(keyring_error)?;

        debug!(key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let encoded = match self.entry(key)?.get_password() {
            Ok(encoded) => encoded,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(keyring_error(e)),
        };

        STANDARD.decode(encoded).map(Some).map_err(|e| {
            error!(key, error = %e, "Keyring secret is not valid base64");
            BridgeError::Storage(format!("Failed to decode secret: {}", e))
        })
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(key, "Deleted secret from keyring");
                Ok(())
            }
            Err(e) => Err(keyring_error(e)),
        }
    }
}
