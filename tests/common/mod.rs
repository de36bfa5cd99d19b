// SPDX-License-Identifier: MIT

//! Shared test fixtures: in-memory store, mock KMS, and a Fitbit client
//! pointed at a local mock provider.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use vitals_tracker::config::Config;
use vitals_tracker::db::{CredentialStore, MemoryStore};
use vitals_tracker::models::StoredAccount;
use vitals_tracker::services::{FitbitClient, FitbitService, KmsService, TokenCache};
use vitals_tracker::time_utils::format_utc_rfc3339;
use vitals_tracker::AppState;

/// Create a Fitbit service wired to the in-memory store and a mock
/// provider at `provider_url` (a wiremock server).
#[allow(dead_code)]
pub fn create_test_service(
    provider_url: &str,
) -> (FitbitService, Arc<MemoryStore>, TokenCache) {
    let config = Config::test_default();
    let store = Arc::new(MemoryStore::new());
    let token_cache: TokenCache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let client = FitbitClient::with_base_urls(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
        provider_url.to_string(),
        provider_url.to_string(),
    );

    let service = FitbitService::new(
        client,
        store.clone(),
        KmsService::new_mock(),
        token_cache.clone(),
        refresh_locks,
    );

    (service, store, token_cache)
}

/// Create a test app with the in-memory store and mock provider.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app(provider_url: &str) -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let store = Arc::new(MemoryStore::new());
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let client = FitbitClient::with_base_urls(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
        provider_url.to_string(),
        provider_url.to_string(),
    );

    let fitbit = FitbitService::new(
        client,
        store.clone(),
        KmsService::new_mock(),
        token_cache,
        refresh_locks,
    );

    let state = Arc::new(AppState {
        config,
        store,
        fitbit,
    });

    (vitals_tracker::routes::create_router(state.clone()), state)
}

/// Create a session JWT the way the middleware expects it.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: Uuid, signing_key: &[u8]) -> String {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: usize,
        iat: usize,
    }

    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 86400,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

/// Seed a linked account. Tokens are "encrypted" with the mock KMS
/// scheme (plain base64), matching `KmsService::new_mock`.
#[allow(dead_code)]
pub async fn seed_account(
    store: &dyn CredentialStore,
    user_id: Uuid,
    access_token: &str,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) {
    let account = StoredAccount {
        user_id,
        fitbit_user_id: "FBUSER1".to_string(),
        display_name: Some("Alex Rivera".to_string()),
        access_token_encrypted: BASE64.encode(access_token),
        refresh_token_encrypted: BASE64.encode(refresh_token),
        expires_at: format_utc_rfc3339(expires_at),
        scopes: vec!["activity".to_string(), "sleep".to_string()],
        linked_at: format_utc_rfc3339(Utc::now()),
        last_synced_at: None,
    };

    store.save(&account).await.unwrap();
}
