//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, key-value
//! storage, secure storage, network monitoring) into the API access layer.
//! Desktop apps typically enable the `desktop-shims` feature (which depends
//! on `bridge-desktop`); mobile hosts pass their own bridges to
//! [`CoreService::new`].

pub mod error;
pub mod persistence;

pub use error::{CoreError, Result};
pub use persistence::{PersistOutcome, PersistenceService};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    network::NetworkMonitor,
    storage::{KeyValueStore, SecureStore},
    time::{Clock, SystemClock},
};
use core_api::{ApiClient, AuthApi, ResourceApi, UserApi};
use core_runtime::{config::ApiConfig, events::EventBus};
use core_sync::{SyncQueue, SyncReport};
use tracing::{info, warn};

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub key_value_store: Arc<dyn KeyValueStore>,
    pub secure_store: Arc<dyn SecureStore>,
    pub network_monitor: Arc<dyn NetworkMonitor>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles, using the
    /// system clock.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        key_value_store: Arc<dyn KeyValueStore>,
        secure_store: Arc<dyn SecureStore>,
        network_monitor: Arc<dyn NetworkMonitor>,
    ) -> Self {
        Self {
            http_client,
            key_value_store,
            secure_store,
            network_monitor,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    client: ApiClient,
    sync_queue: Arc<SyncQueue>,
    persistence: PersistenceService,
    network_monitor: Arc<dyn NetworkMonitor>,
}

impl CoreService {
    /// Validates `config`, restores the sync queue and assembles the API
    /// client.
    pub async fn new(config: ApiConfig, deps: CoreDependencies) -> Result<Self> {
        let event_bus = EventBus::new(config.event_buffer_size);

        let sync_queue = Arc::new(
            SyncQueue::from_config(
                &config,
                deps.key_value_store.clone(),
                deps.clock.clone(),
                event_bus.clone(),
            )
            .await?,
        );

        let client = ApiClient::builder(config)
            .http_client(deps.http_client)
            .key_value_store(deps.key_value_store)
            .secure_store(deps.secure_store)
            .clock(deps.clock)
            .event_bus(event_bus)
            .build()?;

        let persistence = PersistenceService::new(
            ResourceApi::new(client.clone()),
            sync_queue.clone(),
            deps.network_monitor.clone(),
        );

        info!(base_url = %client.config().base_url, "Core service ready");

        Ok(Self {
            client,
            sync_queue,
            persistence,
            network_monitor: deps.network_monitor,
        })
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn auth(&self) -> AuthApi {
        AuthApi::new(self.client.clone())
    }

    pub fn user(&self) -> UserApi {
        UserApi::new(self.client.clone())
    }

    pub fn resources(&self) -> ResourceApi {
        ResourceApi::new(self.client.clone())
    }

    pub fn persistence(&self) -> &PersistenceService {
        &self.persistence
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync_queue
    }

    pub fn events(&self) -> &EventBus {
        self.client.event_bus()
    }

    /// Drains the sync queue when the network is reachable. `None` when
    /// offline or when a drain is already running.
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        if !self.network_monitor.is_connected().await {
            warn!("Skipping sync while offline");
            return Ok(None);
        }
        Ok(self.sync_queue.process_queue(&self.resources()).await?)
    }

    /// Persists the sync queue one last time.
    pub async fn shutdown(&self) -> Result<()> {
        self.sync_queue.shutdown().await?;
        Ok(())
    }
}

/// Convenience bootstrapper for desktop hosts: reqwest transport, SQLite
/// key-value store under `data_dir`, OS keyring for tokens.
///
/// ```no_run
/// # #[cfg(feature = "secure-store")]
/// # async fn example() -> core_service::Result<()> {
/// use core_runtime::config::ApiConfig;
///
/// let config = ApiConfig::builder().base_url("https://api.example.com").build()?;
/// let core = core_service::bootstrap_desktop(config, "/tmp/solace".into()).await?;
/// core.sync_now().await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "secure-store")]
pub async fn bootstrap_desktop(config: ApiConfig, data_dir: std::path::PathBuf) -> Result<CoreService> {
    let secure_store = Arc::new(bridge_desktop::KeyringSecureStore::new());
    bootstrap_desktop_with_secure_store(config, data_dir, secure_store).await
}

/// Desktop bootstrap with a caller-supplied secure store.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop_with_secure_store(
    config: ApiConfig,
    data_dir: std::path::PathBuf,
    secure_store: Arc<dyn SecureStore>,
) -> Result<CoreService> {
    let http_client = bridge_desktop::ReqwestHttpClient::with_timeout(config.request_timeout)
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    let key_value_store = bridge_desktop::SqliteKeyValueStore::new(data_dir.join("solace.db"))
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;

    let deps = CoreDependencies::new(
        Arc::new(http_client),
        Arc::new(key_value_store),
        secure_store,
        Arc::new(bridge_desktop::DesktopNetworkMonitor::new()),
    );
    CoreService::new(config, deps).await
}
