//! Typed endpoint services over a scripted backend.

mod common;

use bridge_traits::http::HttpMethod;
use common::*;
use core_api::services::{LoginRequest, UserPreferences};
use core_api::{AuthApi, ErrorKind, ResourceApi, ResourceKind, UserApi};
use core_runtime::events::{AuthEvent, CoreEvent};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize, PartialEq)]
struct MoodEntry {
    id: String,
    mood: String,
}

fn credentials() -> LoginRequest {
    LoginRequest {
        email: "sam@example.com".to_string(),
        password: "correct horse".to_string(),
    }
}

#[tokio::test]
async fn test_login_persists_tokens_and_announces_session() {
    let server = Arc::new(ScriptedServer::new(|request| match path_of(request) {
        "/auth/login" => json(
            200,
            r#"{"user":{"id":"u1","email":"sam@example.com","plan":"free"},
                "accessToken":"a1","refreshToken":"r1","expiresIn":900}"#,
        ),
        _ => json(404, ""),
    }));
    let client = client_for(server);
    let mut events = client.event_bus().subscribe();
    let auth = AuthApi::new(client.clone());

    let session = auth.login(&credentials()).await.unwrap();

    let user = session.user.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.extra["plan"], "free");
    assert!(session.expires_at.is_some());

    let tokens = client.token_store().get_tokens().await.unwrap().unwrap();
    assert_eq!(tokens.access_token, "a1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
    assert_eq!(
        events.try_recv().unwrap(),
        CoreEvent::Auth(AuthEvent::SignedIn)
    );
}

#[tokio::test]
async fn test_rejected_login_stores_nothing() {
    let server = Arc::new(ScriptedServer::new(|_| {
        json(400, r#"{"message":"Invalid credentials"}"#)
    }));
    let client = client_for(server);
    let auth = AuthApi::new(client.clone());

    let err = auth.login(&credentials()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::ClientError);
    assert_eq!(err.message, "Invalid credentials");
    assert!(!client.token_store().has_tokens().await.unwrap());
}

#[tokio::test]
async fn test_wrong_password_with_stored_session_is_not_a_session_expiry() {
    let server = Arc::new(ScriptedServer::new(|request| match path_of(request) {
        "/auth/refresh" => json(500, ""),
        _ => json(401, r#"{"message":"Invalid credentials"}"#),
    }));
    let client = client_for(server.clone());
    client
        .token_store()
        .store_tokens(&core_auth::AuthTokens::new("old", Some("r1".into()), None))
        .await
        .unwrap();
    let mut events = client.event_bus().subscribe();
    let auth = AuthApi::new(client.clone());

    let err = auth.login(&credentials()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::ClientError);
    assert_eq!(err.status_code, Some(401));
    assert_eq!(err.message, "Invalid credentials");
    assert_eq!(server.calls_to(HttpMethod::Post, "/auth/refresh"), 0);
    assert_eq!(bearer(&server.last_request().unwrap()), None);

    // The previous session is untouched
    let stored = client.token_store().get_tokens().await.unwrap().unwrap();
    assert_eq!(stored.access_token, "old");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_logout_clears_session_even_when_offline() {
    let server = Arc::new(ScriptedServer::new(|request| match request.method {
        HttpMethod::Get => json(200, r#"{"id":"u1","email":"sam@example.com"}"#),
        _ => unreachable(),
    }));
    let client = client_for(server.clone());
    client
        .token_store()
        .store_tokens(&core_auth::AuthTokens::new("a1", Some("r1".into()), None))
        .await
        .unwrap();
    let auth = AuthApi::new(client.clone());
    auth.get_profile().await.unwrap();

    let mut events = client.event_bus().subscribe();
    auth.logout().await;

    assert!(!client.token_store().has_tokens().await.unwrap());
    assert_eq!(
        events.try_recv().unwrap(),
        CoreEvent::Auth(AuthEvent::SignedOut)
    );

    // Profile cache is gone: the next read hits the network again
    auth.get_profile().await.unwrap();
    assert_eq!(server.calls_to(HttpMethod::Get, "/auth/profile"), 2);
}

#[tokio::test]
async fn test_preferences_are_cached() {
    let server = Arc::new(ScriptedServer::new(|request| match request.method {
        HttpMethod::Get => json(200, r#"{"notificationsEnabled":true,"theme":"dusk"}"#),
        _ => json(200, r#"{"notificationsEnabled":false,"theme":"dusk"}"#),
    }));
    let client = client_for(server.clone());
    let user = UserApi::new(client);

    let first = user.get_preferences().await.unwrap();
    let second = user.get_preferences().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.theme.as_deref(), Some("dusk"));
    assert_eq!(server.calls_to(HttpMethod::Get, "/user/preferences"), 1);

    let updated = user
        .update_preferences(&UserPreferences {
            notifications_enabled: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.notifications_enabled, Some(false));

    user.get_preferences().await.unwrap();
    assert_eq!(server.calls_to(HttpMethod::Get, "/user/preferences"), 2);
}

#[tokio::test]
async fn test_resource_crud_paths() {
    let server = Arc::new(ScriptedServer::new(|request| match (request.method, path_of(request)) {
        (HttpMethod::Get, "/journal/entries") => json(200, r#"[]"#),
        (HttpMethod::Post, "/mood/entries") => json(201, r#"{"id":"m1","mood":"calm"}"#),
        (HttpMethod::Put, "/mood/entries/m1") => json(200, r#"{"id":"m1","mood":"tired"}"#),
        (HttpMethod::Delete, "/assessments/a1") => json(204, ""),
        _ => json(404, ""),
    }));
    let resources = ResourceApi::new(client_for(server.clone()));

    let journal: Vec<MoodEntry> = resources.list(ResourceKind::JournalEntries).await.unwrap();
    assert!(journal.is_empty());

    let created: MoodEntry = resources
        .create(ResourceKind::MoodEntries, &json!({"mood": "calm"}))
        .await
        .unwrap();
    assert_eq!(created.id, "m1");

    let updated: MoodEntry = resources
        .update(ResourceKind::MoodEntries, "m1", &json!({"mood": "tired"}))
        .await
        .unwrap();
    assert_eq!(updated.mood, "tired");

    resources
        .delete(ResourceKind::Assessments, "a1")
        .await
        .unwrap();
    assert_eq!(server.calls_to(HttpMethod::Delete, "/assessments/a1"), 1);
}
