//! `/auth/*` endpoints.

use crate::cache::CacheTtl;
use crate::client::{auth_failure, ApiClient, RequestOptions};
use crate::error::Result;
use bridge_traits::http::HttpMethod;
use core_auth::TokenResponse;
use core_runtime::events::{AuthEvent, CoreEvent};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

const LOGIN: &str = "/auth/login";
const REGISTER: &str = "/auth/register";
const LOGOUT: &str = "/auth/logout";
const PROFILE: &str = "/auth/profile";
const CHANGE_PASSWORD: &str = "/auth/change-password";
const FORGOT_PASSWORD: &str = "/auth/forgot-password";
const RESET_PASSWORD: &str = "/auth/reset-password";
const VERIFY_MFA: &str = "/auth/verify-mfa";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMfaRequest {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Account profile. Fields the backend adds later land in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a successful login, registration or MFA verification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

/// Result of signing in; the tokens are already persisted.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: Option<UserProfile>,
    pub expires_at: Option<i64>,
}

/// Session lifecycle and account endpoints.
#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    #[instrument(skip_all)]
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthSession> {
        let response: AuthResponse = self.post_credentials(LOGIN, request).await?;
        self.start_session(LOGIN, response).await
    }

    #[instrument(skip_all)]
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthSession> {
        let response: AuthResponse = self.post_credentials(REGISTER, request).await?;
        self.start_session(REGISTER, response).await
    }

    #[instrument(skip_all)]
    pub async fn verify_mfa(&self, request: &VerifyMfaRequest) -> Result<AuthSession> {
        let response: AuthResponse = self.post_credentials(VERIFY_MFA, request).await?;
        self.start_session(VERIFY_MFA, response).await
    }

    /// Ends the session locally even when the backend cannot be reached.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(e) = self
            .client
            .authenticated_fetch(HttpMethod::Post, LOGOUT, RequestOptions::default())
            .await
        {
            warn!(error = %e, "Logout request failed, clearing local session anyway");
        }

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
        info!("Signed out");
    }

    pub async fn get_profile(&self) -> Result<UserProfile> {
        self.client
            .get(PROFILE, RequestOptions::new().cache_ttl(CacheTtl::Long))
            .await
    }

    pub async fn update_profile(&self, changes: &Value) -> Result<UserProfile> {
        self.client.put(PROFILE, changes).await
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> Result<()> {
        let _: IgnoredAny = self.client.post(CHANGE_PASSWORD, request).await?;
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let _: IgnoredAny = self
            .post_credentials(FORGOT_PASSWORD, &serde_json::json!({ "email": email }))
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<()> {
        let _: IgnoredAny = self.post_credentials(RESET_PASSWORD, request).await?;
        Ok(())
    }

    /// A 401 here means rejected credentials, never an expired session.
    async fn post_credentials<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let options = self.client.json_options(path, body)?.anonymous();
        self.client.request(HttpMethod::Post, path, options).await
    }

    async fn start_session(&self, path: &str, response: AuthResponse) -> Result<AuthSession> {
        let tokens = response
            .tokens
            .into_tokens(self.client.clock().unix_timestamp(), None);

        self.client
            .token_store()
            .store_tokens(&tokens)
            .await
            .map_err(|e| auth_failure(e, &self.client.config().endpoint(path)))?;

        let _ = self
            .client
            .event_bus()
            .emit(CoreEvent::Auth(AuthEvent::SignedIn));
        info!(expires_at = ?tokens.expires_at, "Signed in");

        Ok(AuthSession {
            user: response.user,
            expires_at: tokens.expires_at,
        })
    }
}
