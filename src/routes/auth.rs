// SPDX-License-Identifier: MIT

//! Fitbit OAuth authorization routes.
//!
//! `GET /auth/fitbit` sends the authenticated user to the Fitbit consent
//! screen; `GET /auth/fitbit/callback` completes the link. The `state`
//! parameter is HMAC-signed and carries the user identity across the
//! provider round-trip, so the callback never trusts bare query input.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// How long a signed state parameter stays valid.
const STATE_TTL_MILLIS: u128 = 15 * 60 * 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/fitbit/callback", get(auth_callback))
}

/// Routes that require an authenticated session (merged behind the auth
/// middleware in routes/mod.rs).
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/fitbit", get(auth_start))
}

/// Query parameters for starting the OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Frontend URL to redirect back to after OAuth completes.
    /// If not provided, uses the configured FRONTEND_URL.
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Start the OAuth flow - redirect to the Fitbit consent screen.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    axum::Extension(user): axum::Extension<AuthUser>,
    Query(params): Query<AuthStartParams>,
    headers: axum::http::HeaderMap,
) -> Result<Redirect> {
    let frontend_url = params
        .redirect_uri
        .unwrap_or_else(|| state.config.frontend_url.clone());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();

    let oauth_state = sign_state(
        user.user_id,
        &frontend_url,
        timestamp,
        &state.config.oauth_state_key,
    )?;

    let callback_url = callback_url_from_headers(&headers);
    let auth_url = state.fitbit.authorize_url(&callback_url, &oauth_state);

    tracing::info!(
        user_id = %user.user_id,
        frontend_url = %frontend_url,
        "Starting OAuth flow, redirecting to Fitbit"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code for tokens and store the account.
///
/// Always redirects back to the frontend with a success/failure
/// indicator; provider tokens never appear in the redirect URL.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    // The state carries the user identity, so a bad signature is a hard
    // failure rather than a fallback.
    let (user_id, frontend_url) = verify_state(&params.state, &state.config.oauth_state_key)
        .ok_or_else(|| {
            tracing::warn!("Invalid or expired OAuth state parameter");
            AppError::BadRequest("Invalid or expired OAuth state".to_string())
        })?;

    // Denied consent is terminal for this attempt, not fatal to the app.
    if let Some(error) = params.error {
        tracing::warn!(user_id = %user_id, error = %error, "OAuth consent denied or failed");
        return Ok(Redirect::temporary(&format!(
            "{frontend_url}?fitbit=denied"
        )));
    }

    let Some(code) = params.code else {
        tracing::warn!(user_id = %user_id, "OAuth callback without authorization code");
        return Ok(Redirect::temporary(&format!("{frontend_url}?fitbit=error")));
    };

    let callback_url = callback_url_from_headers(&headers);

    match state
        .fitbit
        .handle_oauth_callback(user_id, &code, &callback_url)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                user_id = %user_id,
                fitbit_user = %outcome.fitbit_user_id,
                "OAuth successful, account linked"
            );
            Ok(Redirect::temporary(&format!(
                "{}?fitbit=connected&account={}",
                frontend_url,
                urlencoding::encode(&outcome.display_name)
            )))
        }
        Err(e) => {
            // Authorization codes are single-use; report failure and let
            // the user restart the flow.
            tracing::error!(user_id = %user_id, error = %e, "OAuth code exchange failed");
            Ok(Redirect::temporary(&format!("{frontend_url}?fitbit=error")))
        }
    }
}

/// Derive the externally visible callback URL from the request headers.
fn callback_url_from_headers(headers: &axum::http::HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            std::env::var("API_HOST").unwrap_or_else(|_| "localhost:8080".to_string())
        });

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };

    format!("{scheme}://{host}/auth/fitbit/callback")
}

/// Sign `user_id|frontend_url|timestamp` and base64url-encode the result.
fn sign_state(
    user_id: Uuid,
    frontend_url: &str,
    timestamp: u128,
    secret: &[u8],
) -> Result<String> {
    let payload = format!("{}|{}|{:x}", user_id, frontend_url, timestamp);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{payload}|{signature}").as_bytes()))
}

/// Verify the HMAC signature and freshness of the OAuth state parameter,
/// returning the user ID and frontend redirect URL it carries.
fn verify_state(state: &str, secret: &[u8]) -> Option<(Uuid, String)> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "user_id|frontend_url|timestamp_hex|signature_hex"
    let parts: Vec<&str> = state_str.splitn(4, '|').collect();
    if parts.len() != 4 {
        return None;
    }

    let user_id: Uuid = parts[0].parse().ok()?;
    let frontend_url = parts[1];
    let timestamp_hex = parts[2];
    let signature_hex = parts[3];

    // Reconstruct payload and verify signature
    let payload = format!("{}|{}|{}", parts[0], frontend_url, timestamp_hex);

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    let expected_signature = hex::encode(mac.finalize().into_bytes());

    if signature_hex != expected_signature {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    // Reject stale states: the consent round-trip takes minutes, not hours.
    let timestamp = u128::from_str_radix(timestamp_hex, 16).ok()?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_millis();
    if now.saturating_sub(timestamp) > STATE_TTL_MILLIS {
        tracing::warn!("OAuth state expired");
        return None;
    }

    Some((user_id, frontend_url.to_string()))
}
