//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkInfo, NetworkMonitor, NetworkStatus},
};
use std::time::Duration;
use tracing::debug;

const DEFAULT_PROBE_ADDRESS: &str = "8.8.8.8:53";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Desktop network monitor implementation
///
/// Detects connectivity with a TCP reachability probe. Point the probe at
/// the API host to get "backend reachable" rather than "internet reachable".
pub struct DesktopNetworkMonitor {
    probe_address: String,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        Self::with_probe_address(DEFAULT_PROBE_ADDRESS)
    }

    /// Probe `host:port` instead of the default public resolver
    pub fn with_probe_address(address: impl Into<String>) -> Self {
        Self {
            probe_address: address.into(),
        }
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            PROBE_TIMEOUT,
            tokio::net::TcpStream::connect(self.probe_address.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let status = self.check_connectivity().await;
        debug!(status = ?status, probe = %self.probe_address, "Network info updated");

        // Desktop connections are treated as unmetered.
        Ok(NetworkInfo {
            status,
            is_metered: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reachable_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let monitor = DesktopNetworkMonitor::with_probe_address(address);
        assert!(monitor.is_connected().await);
    }

    #[tokio::test]
    async fn test_unreachable_probe_is_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let monitor = DesktopNetworkMonitor::with_probe_address(address);
        let info = monitor.get_network_info().await.unwrap();
        assert_eq!(info.status, NetworkStatus::Disconnected);
    }
}
