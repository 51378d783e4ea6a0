//! # Core Runtime Module
//!
//! Foundational infrastructure shared by the API layer crates:
//! - Logging and tracing setup
//! - `ApiConfig` with fail-fast validation
//! - Event bus for session and sync notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ApiConfig, ApiConfigBuilder};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, SyncEvent};
