use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Session tokens issued by the backend.
///
/// # Security
///
/// Tokens must never be logged. The `Debug` implementation redacts them.
///
/// # Examples
///
/// ```
/// use core_auth::AuthTokens;
///
/// let tokens = AuthTokens::new("s3cr3t", Some("r3fr3sh".to_string()), Some(1_700_000_000));
/// let printed = format!("{:?}", tokens);
/// assert!(!printed.contains("s3cr3t"));
/// assert!(!printed.contains("r3fr3sh"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix epoch seconds), when the backend reports one
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl AuthTokens {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token payload returned by `/auth/login`, `/auth/register`,
/// `/auth/verify-mfa` and `/auth/refresh`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Converts to stored tokens. When the backend does not rotate the
    /// refresh token, `previous_refresh_token` is kept.
    pub fn into_tokens(self, now: i64, previous_refresh_token: Option<&str>) -> AuthTokens {
        AuthTokens {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh_token.map(str::to_string)),
            expires_at: self.expires_in.map(|secs| now + secs),
        }
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Stable identifier for a refresh token: hex SHA-256 of the full token.
///
/// Used to key per-token state without holding or truncating the secret.
pub fn refresh_token_key(refresh_token: &str) -> String {
    let digest = Sha256::digest(refresh_token.as_bytes());
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}
