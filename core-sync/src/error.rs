use bridge_traits::BridgeError;
use core_api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No resource handles endpoint {endpoint}")]
    UnknownResource { endpoint: String },

    #[error("Queued {operation} for {endpoint} has no id in its payload")]
    MissingId { operation: String, endpoint: String },

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Failure talking to the backend that may clear up on its own
    /// (offline, timeout, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Api(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
