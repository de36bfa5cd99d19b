// SPDX-License-Identifier: MIT

//! Authorization flow tests: code exchange, profile fetch, signed-state
//! verification, and redirect hygiene (no token material in URLs).

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vitals_tracker::db::CredentialStore;
use vitals_tracker::error::AppError;

mod common;
use common::{create_test_app, create_test_jwt, create_test_service};

/// Sign an OAuth state the way auth.rs does (mirrors the route logic).
fn make_signed_state(user_id: Uuid, frontend_url: &str, secret: &[u8]) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let payload = format!("{}|{}|{:x}", user_id, frontend_url, timestamp);

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    URL_SAFE_NO_PAD.encode(format!("{payload}|{signature}").as_bytes())
}

fn mount_token_exchange(code: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={code}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "T1",
            "refresh_token": "R1",
            "expires_in": 3600,
            "user_id": "FBUSER1",
            "scope": "activity heartrate profile sleep weight",
            "token_type": "Bearer"
        })))
}

fn mount_profile() -> Mock {
    Mock::given(method("GET"))
        .and(path("/1/user/-/profile.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user": {
                "displayName": "Alex Rivera",
                "encodedId": "FBUSER1",
                "avatar": "https://example.com/avatar.png"
            }
        })))
}

#[tokio::test]
async fn test_complete_authorization_stores_linked_account() {
    let server = MockServer::start().await;
    let (service, store, _cache) = create_test_service(&server.uri());

    mount_token_exchange("abc123").expect(1).mount(&server).await;
    mount_profile().expect(1).mount(&server).await;

    let user_id = Uuid::new_v4();
    let before = Utc::now();
    let outcome = service
        .handle_oauth_callback(user_id, "abc123", "http://localhost:8080/auth/fitbit/callback")
        .await
        .unwrap();

    assert_eq!(outcome.fitbit_user_id, "FBUSER1");
    assert_eq!(outcome.display_name, "Alex Rivera");

    // The stored record carries both tokens (encrypted) and an expiry
    // about an hour out.
    use base64::engine::general_purpose::STANDARD as BASE64;
    let account = store.load(user_id).await.unwrap().unwrap();
    assert_eq!(BASE64.decode(&account.access_token_encrypted).unwrap(), b"T1");
    assert_eq!(BASE64.decode(&account.refresh_token_encrypted).unwrap(), b"R1");

    let expires_at = vitals_tracker::time_utils::parse_utc_rfc3339(&account.expires_at).unwrap();
    let lifetime = (expires_at - before).num_seconds();
    assert!((3595..=3605).contains(&lifetime), "lifetime was {lifetime}s");

    assert_eq!(account.display_name.as_deref(), Some("Alex Rivera"));
    assert!(account.scopes.contains(&"sleep".to_string()));
}

#[tokio::test]
async fn test_invalid_code_fails_without_partial_writes() {
    let server = MockServer::start().await;
    let (service, store, _cache) = create_test_service(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "errors": [{"errorType": "invalid_grant", "message": "Authorization code expired"}],
            "success": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user_id = Uuid::new_v4();
    let result = service
        .handle_oauth_callback(user_id, "expired", "http://localhost:8080/auth/fitbit/callback")
        .await;

    assert!(matches!(result, Err(AppError::AuthExchange(_))));
    assert!(store.load(user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_auth_start_redirects_to_consent_screen() {
    let server = MockServer::start().await;
    let (app, state) = create_test_app(&server.uri());

    let user_id = Uuid::new_v4();
    let jwt = create_test_jwt(user_id, &state.config.jwt_signing_key);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/fitbit")
                .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
                .header(header::HOST, "localhost:8080")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("/oauth2/authorize?"));
    assert!(location.contains("response_type=code"));
    assert!(location.contains("client_id=test_client_id"));
    assert!(location.contains("state="));
    // Callback derived from the Host header
    assert!(location.contains(&urlencoding::encode(
        "http://localhost:8080/auth/fitbit/callback"
    ).into_owned()));
}

#[tokio::test]
async fn test_auth_start_requires_session() {
    let server = MockServer::start().await;
    let (app, _state) = create_test_app(&server.uri());

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/fitbit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_redirect_never_leaks_tokens() {
    let server = MockServer::start().await;
    let (app, state) = create_test_app(&server.uri());

    mount_token_exchange("abc123").mount(&server).await;
    mount_profile().mount(&server).await;

    let user_id = Uuid::new_v4();
    let oauth_state = make_signed_state(
        user_id,
        &state.config.frontend_url,
        &state.config.oauth_state_key,
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/auth/fitbit/callback?code=abc123&state={oauth_state}"))
                .header(header::HOST, "localhost:8080")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with(&state.config.frontend_url));
    assert!(location.contains("fitbit=connected"));
    // The provider token pair must never reach the browser.
    assert!(!location.contains("T1"));
    assert!(!location.contains("R1"));

    // And the account really was linked.
    assert!(state.store.load(user_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_callback_with_tampered_state_is_rejected() {
    let server = MockServer::start().await;
    let (app, _state) = create_test_app(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let forged = URL_SAFE_NO_PAD.encode(format!(
        "{}|https://evil.example|0|deadbeef",
        Uuid::new_v4()
    ));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/auth/fitbit/callback?code=abc123&state={forged}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_denied_consent_redirects_without_linking() {
    let server = MockServer::start().await;
    let (app, state) = create_test_app(&server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let user_id = Uuid::new_v4();
    let oauth_state = make_signed_state(
        user_id,
        &state.config.frontend_url,
        &state.config.oauth_state_key,
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/auth/fitbit/callback?error=access_denied&state={oauth_state}"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("fitbit=denied"));
    assert!(state.store.load(user_id).await.unwrap().is_none());
}
