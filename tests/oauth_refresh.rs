//! Refresh-token exchange against a local token endpoint.

use std::sync::Arc;

use chrono::Utc;
use mcp_gateway::auth::{AuthError, CredentialStore, FileCredentialStore, GoogleOAuth, TokenProvider};

mod common;

fn oauth() -> GoogleOAuth {
    GoogleOAuth::new("/nonexistent/client_secrets.json").unwrap()
}

#[tokio::test]
async fn test_refresh_success_keeps_refresh_token() {
    let (addr, seen) = common::start_token_endpoint(
        200,
        r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#,
    )
    .await;

    let mut credential = common::credential("youtube", "default", -5);
    credential.token_uri = format!("http://{addr}/token");

    let refreshed = oauth().refresh(&credential).await.unwrap();
    assert_eq!(refreshed.access_token, "ya29.fresh");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("stored-refresh-token"));
    assert_eq!(refreshed.token_uri, credential.token_uri);
    assert_eq!(refreshed.scopes, credential.scopes);
    let remaining = refreshed.remaining_at(Utc::now()).unwrap();
    assert!(remaining > chrono::Duration::minutes(58));

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("grant_type=refresh_token"));
    assert!(bodies[0].contains("refresh_token=stored-refresh-token"));
}

#[tokio::test]
async fn test_invalid_grant_requires_reconsent() {
    let (addr, _) = common::start_token_endpoint(
        400,
        r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
    )
    .await;

    let mut credential = common::credential("youtube", "default", -5);
    credential.token_uri = format!("http://{addr}/token");

    let err = oauth().refresh(&credential).await.unwrap_err();
    assert!(err.needs_reconsent(), "unexpected error: {err}");
    assert!(err.to_string().contains("youtube:default"));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (addr, _) = common::start_token_endpoint(500, r#"{"error":"internal_failure"}"#).await;

    let mut credential = common::credential("youtube", "default", -5);
    credential.token_uri = format!("http://{addr}/token");

    let err = oauth().refresh(&credential).await.unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let addr = common::closed_port().await;
    let mut credential = common::credential("youtube", "default", -5);
    credential.token_uri = format!("http://{addr}/token");

    let err = oauth().refresh(&credential).await.unwrap_err();
    assert!(matches!(err, AuthError::Transient { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_manager_refreshes_expired_record_over_http() {
    let (addr, seen) = common::start_token_endpoint(
        200,
        r#"{"access_token":"ya29.fresh","expires_in":3600,"token_type":"Bearer"}"#,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let store = FileCredentialStore::new(dir.path());

    let mut stored = common::credential("youtube", "default", -1);
    stored.token_uri = format!("http://{addr}/token");
    store.save(&stored).await.unwrap();

    let manager = common::auth_manager(dir.path(), Arc::new(oauth()));
    let credential = manager.get_credentials("youtube", None, None).await.unwrap();
    assert_eq!(credential.access_token, "ya29.fresh");

    let persisted = store.load("youtube", "default").await.unwrap().unwrap();
    assert_eq!(persisted.access_token, "ya29.fresh");
    assert_eq!(persisted.refresh_token.as_deref(), Some("stored-refresh-token"));

    // Cached and fresh: no second round trip.
    manager.get_credentials("youtube", None, None).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}
