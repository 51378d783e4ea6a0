//! Secure Token Storage
//!
//! Persists the session's [`AuthTokens`] through the platform `SecureStore`
//! (Keychain, Keystore, OS keyring).
//!
//! - Tokens are serialized to JSON under a single key
//! - Token values never appear in logs or error messages
//! - Corrupted entries are erased so the next sign-in starts clean
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{AuthTokens, TokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let token_store = TokenStore::new(secure_store);
//!
//! let tokens = AuthTokens::new("access", Some("refresh".to_string()), None);
//! token_store.store_tokens(&tokens).await?;
//!
//! assert!(token_store.get_tokens().await?.is_some());
//! token_store.clear_tokens().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::AuthTokens;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secure store key holding the serialized session tokens.
pub const TOKENS_KEY: &str = "auth_tokens";

/// Secure storage for the session tokens.
#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self { secure_store }
    }

    /// Stores tokens, overwriting any previous session.
    pub async fn store_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        let json = serde_json::to_vec(tokens)?;

        self.secure_store
            .set_secret(TOKENS_KEY, &json)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to store tokens in secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_at = ?tokens.expires_at,
            "Tokens stored"
        );

        Ok(())
    }

    /// Returns the stored tokens, or `None` when signed out.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenCorrupted`] if the stored value cannot be decoded.
    /// The corrupted entry is deleted before returning.
    pub async fn get_tokens(&self) -> Result<Option<AuthTokens>> {
        let data = self
            .secure_store
            .get_secret(TOKENS_KEY)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to read tokens from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        let Some(data) = data else {
            return Ok(None);
        };

        match serde_json::from_slice::<AuthTokens>(&data) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                warn!(error = %e, "Stored tokens are corrupted, erasing them");

                if let Err(delete_err) = self.secure_store.delete_secret(TOKENS_KEY).await {
                    warn!(error = %delete_err, "Failed to delete corrupted token data");
                }

                Err(AuthError::TokenCorrupted(e.to_string()))
            }
        }
    }

    /// Erases the stored tokens. Idempotent.
    pub async fn clear_tokens(&self) -> Result<()> {
        self.secure_store
            .delete_secret(TOKENS_KEY)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to delete tokens from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!("Stored tokens cleared");
        Ok(())
    }

    pub async fn has_tokens(&self) -> Result<bool> {
        self.secure_store
            .has_secret(TOKENS_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }
}
