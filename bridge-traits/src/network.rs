//! Network Monitoring Abstraction
//!
//! Provides network connectivity and status information.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

/// Network monitor trait
///
/// Lets the core decide whether a mutation should go to the network now or be
/// parked in the offline sync queue, and lets hosts decide when connectivity
/// resumption justifies draining that queue.
///
/// # Platform Support
///
/// - **Desktop**: TCP reachability probe
/// - **iOS**: Network framework, Reachability
/// - **Android**: ConnectivityManager
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    ///
    /// `Indeterminate` counts as connected so callers attempt the request and
    /// let the transport decide.
    async fn is_connected(&self) -> bool {
        match self.get_network_info().await {
            Ok(info) => info.status != NetworkStatus::Disconnected,
            Err(_) => true,
        }
    }
}
