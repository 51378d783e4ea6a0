//! # Authentication Module
//!
//! Session token persistence and refresh coordination for the API layer.
//!
//! ## Features
//!
//! - Secure token storage via the platform `SecureStore`
//! - Single-flight token refresh: concurrent 401s share one refresh call
//! - Per-token refresh budget within a sliding window
//! - Session events (`TokenRefreshing`, `TokenRefreshed`, `SessionExpired`)

pub mod error;
pub mod refresh;
pub mod token_store;
pub mod types;

pub use error::{AuthError, Result};
pub use refresh::{RefreshPolicy, TokenRefreshCoordinator, REFRESH_PATH};
pub use token_store::TokenStore;
pub use types::{refresh_token_key, AuthTokens, TokenResponse};
