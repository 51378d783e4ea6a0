use crate::cache::CacheTtl;
use crate::client::{ApiClient, RequestOptions};
use crate::error::Result;
use core_runtime::events::{AuthEvent, CoreEvent};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

const PREFERENCES: &str = "/user/preferences";
const ACCOUNT: &str = "/user/account";

/// App preferences stored server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications_enabled: Option<bool>,
    /// Local time of the daily check-in reminder, `HH:MM`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone)]
pub struct UserApi {
    client: ApiClient,
}

impl UserApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn get_preferences(&self) -> Result<UserPreferences> {
        self.client
            .get(PREFERENCES, RequestOptions::new().cache_ttl(CacheTtl::Day))
            .await
    }

    pub async fn update_preferences(&self, preferences: &UserPreferences) -> Result<UserPreferences> {
        self.client.put(PREFERENCES, preferences).await
    }

    /// Deletes the account, then drops every trace of the session locally.
    #[instrument(skip(self))]
    pub async fn delete_account(&self) -> Result<()> {
        let _: IgnoredAny = self.client.delete(ACCOUNT).await?;

        if let Err(e) = self.client.token_store().clear_tokens().await {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        if let Err(e) = self.client.cache().clear().await {
            warn!(error = %e, "Failed to clear response cache");
        }
        let _ = self
            .client
            .event_bus()
            .emit(CoreEvent::Auth(AuthEvent::SignedOut));

        info!("Account deleted");
        Ok(())
    }
}
