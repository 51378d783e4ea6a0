use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Terminal: stored tokens were cleared and the user must sign in again.
    #[error("Session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored tokens are corrupted: {0}")]
    TokenCorrupted(String),

    #[error("Failed to serialize tokens: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    pub(crate) fn expired(reason: impl Into<String>) -> Self {
        AuthError::SessionExpired {
            reason: reason.into(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, AuthError::SessionExpired { .. })
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
