use bridge_traits::BridgeError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// No response within the request timeout (carried as status 408)
    RequestTimeout,
    /// 429
    RateLimited,
    /// 503 or 504
    ServiceUnavailable,
    /// Any other 5xx
    ServerError,
    /// 401 after a failed or exhausted refresh; stored tokens are gone
    AuthExpired,
    /// 4xx other than 408 and 429
    ClientError,
    /// An interceptor failed before the call completed
    InterceptorFailure,
    /// Connection failures and anything else the transport reports
    Transport,
    /// The response body did not match the expected type
    Decode,
    /// The caller's cancellation token fired
    Cancelled,
}

impl ErrorKind {
    /// Kind implied by a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => ErrorKind::RequestTimeout,
            429 => ErrorKind::RateLimited,
            503 | 504 => ErrorKind::ServiceUnavailable,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::ClientError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error returned by every API call.
///
/// Retry decisions inspect this value; nothing is signalled by unwinding.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind} calling {endpoint}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Error for a non-success response. `message` should come from the
    /// response body when the backend supplied one.
    pub fn from_status(status: u16, message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), message, endpoint).with_status(status)
    }

    pub fn timeout(endpoint: impl Into<String>, after: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::RequestTimeout,
            format!("Request timed out after {}ms", after.as_millis()),
            endpoint,
        )
        .with_status(408)
    }

    pub fn cancelled(endpoint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, "Request cancelled", endpoint)
    }

    pub fn auth_expired(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthExpired, reason, endpoint).with_status(401)
    }

    pub fn interceptor(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InterceptorFailure, message, endpoint)
    }

    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message, endpoint)
    }

    /// Maps a transport failure, keeping timeouts distinguishable.
    pub fn from_bridge(error: BridgeError, endpoint: impl Into<String>) -> Self {
        match error {
            BridgeError::Timeout(message) => {
                Self::new(ErrorKind::RequestTimeout, message, endpoint).with_status(408)
            }
            other => Self::new(ErrorKind::Transport, other.to_string(), endpoint),
        }
    }

    /// Transient status worth retrying: 408, 429, 503, 504 or any 5xx.
    ///
    /// Errors without a status (transport, decode, cancellation) are never
    /// retryable.
    pub fn is_retryable(&self) -> bool {
        if matches!(self.kind, ErrorKind::Cancelled | ErrorKind::AuthExpired) {
            return false;
        }
        matches!(
            self.status_code,
            Some(408) | Some(429) | Some(503) | Some(504) | Some(500..=599)
        )
    }

    /// Transport, timeout and 5xx failures: the request may succeed later
    /// without any change from the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport) || self.is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Failure of a response cache operation.
///
/// The orchestrator logs these and carries on; a broken cache never fails a
/// request.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Cache entry codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid invalidation pattern: {0}")]
    Pattern(#[from] regex::Error),
}
