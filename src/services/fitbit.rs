// SPDX-License-Identifier: MIT

//! Fitbit API client and account-linking service.
//!
//! Handles:
//! - OAuth authorization-code exchange and token revocation
//! - Token refresh when expired (serialized per user)
//! - Profile and metric endpoint calls
//! - In-memory access-token caching to reduce KMS calls

use crate::error::AppError;
use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Bounded timeout for every provider call.
const PROVIDER_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Scopes requested at authorization time.
pub const OAUTH_SCOPES: &str = "activity heartrate profile sleep weight";

/// Consent-screen token lifetime requested from Fitbit (one week).
const AUTHORIZE_EXPIRES_IN: &str = "604800";

/// Low-level Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    api_base: String,
    auth_base: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    /// Create a new Fitbit client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_base_urls(
            client_id,
            client_secret,
            "https://api.fitbit.com".to_string(),
            "https://www.fitbit.com".to_string(),
        )
    }

    /// Create a client against explicit base URLs (used by tests to point
    /// at a local mock server).
    pub fn with_base_urls(
        client_id: String,
        client_secret: String,
        api_base: String,
        auth_base: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            auth_base,
            client_id,
            client_secret,
        }
    }

    /// Build the consent-screen URL the user is redirected to.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/oauth2/authorize?\
             response_type=code&\
             client_id={}&\
             redirect_uri={}&\
             scope={}&\
             expires_in={}&\
             state={}",
            self.auth_base,
            self.client_id,
            urlencoding::encode(redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            AUTHORIZE_EXPIRES_IN,
            state
        )
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// Codes are single-use: any failure here is terminal for the link
    /// attempt and is never retried.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .timeout(PROVIDER_TIMEOUT)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AppError::AuthExchange(format!("Token exchange request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Fitbit token exchange failed");
            return Err(AppError::AuthExchange(format!(
                "Token exchange failed with status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::AuthExchange(format!("Failed to parse token response: {e}")))
    }

    /// Refresh an expired access token.
    ///
    /// A 4xx here means the refresh token was rejected (revoked, expired,
    /// or already rotated by another instance) and maps to `Refresh`;
    /// transient failures map to `Fetch`.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .timeout(PROVIDER_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AppError::transport(&e))?;

        let status = response.status();
        // 400/401/403 mean the grant itself is bad; anything else
        // (rate limiting, outages) is transient and keeps the link.
        if matches!(status.as_u16(), 400 | 401 | 403) {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Refresh(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Refresh(format!("Failed to parse refresh response: {e}")))
    }

    /// Revoke an access token, invalidating the grant on the provider side.
    pub async fn revoke(&self, access_token: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(format!("{}/oauth2/revoke", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .timeout(PROVIDER_TIMEOUT)
            .form(&[("token", access_token)])
            .send()
            .await
            .map_err(|e| AppError::transport(&e))?;

        self.check_response(response).await?;
        tracing::info!("Fitbit token revocation successful");
        Ok(())
    }

    /// Get the authenticated user's profile.
    pub async fn get_profile(&self, access_token: &str) -> Result<FitbitProfile, AppError> {
        let url = format!("{}/1/user/-/profile.json", self.api_base);
        let response: ProfileResponse = self.get_json(&url, access_token).await?;
        Ok(response.user)
    }

    /// Generic GET request with JSON response.
    pub(crate) async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .timeout(PROVIDER_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::transport(&e))?;

        self.check_response_json(response).await
    }

    /// Base URL of the data API (for endpoint builders).
    pub(crate) fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Check response status and return error if not successful.
    async fn check_response(&self, response: reqwest::Response) -> Result<(), AppError> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Fetch { status, body })
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Fetch { status, body });
        }

        response.json().await.map_err(|e| AppError::Fetch {
            status: 0,
            body: format!("JSON parse error: {e}"),
        })
    }
}

/// Token endpoint response (code exchange and refresh share the shape).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    /// Fitbit user ID, present on code exchange.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Profile endpoint payload wrapper.
#[derive(Debug, Clone, Deserialize)]
struct ProfileResponse {
    user: FitbitProfile,
}

/// The slice of the Fitbit profile the app cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitbitProfile {
    pub encoded_id: String,
    pub display_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// FitbitService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::CredentialStore;
use crate::models::{MetricRecord, MetricRequest, StoredAccount};
use crate::services::kms::{encrypt_tokens, KmsService};
use crate::services::metrics;
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Margin before token expiration when we proactively refresh.
const TOKEN_REFRESH_SKEW_SECS: i64 = 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Shared token cache type for use in AppState.
pub type TokenCache = Arc<DashMap<Uuid, CachedToken>>;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// Outcome of a completed link flow, safe to expose to the UI.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub fitbit_user_id: String,
    pub display_name: String,
}

/// High-level Fitbit service that manages token lifecycle and API calls.
///
/// This service encapsulates:
/// - Token retrieval and decryption from the credential store
/// - Automatic token refresh when expiring (with a 60-second margin)
/// - Re-encryption and storage of the rotated pair
/// - Per-user locking so concurrent requests trigger a single refresh
/// - The OAuth callback, disconnect, and metric-fetch entry points
#[derive(Clone)]
pub struct FitbitService {
    client: FitbitClient,
    store: Arc<dyn CredentialStore>,
    kms: KmsService,
    /// In-memory cache of decrypted access tokens (shared across requests).
    token_cache: TokenCache,
    /// Per-user mutex to serialize token refresh operations.
    refresh_locks: RefreshLocks,
}

impl FitbitService {
    /// Create a new Fitbit service with shared token cache.
    ///
    /// The `token_cache` and `refresh_locks` should be shared across all
    /// `FitbitService` instances within a server instance.
    pub fn new(
        client: FitbitClient,
        store: Arc<dyn CredentialStore>,
        kms: KmsService,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            client,
            store,
            kms,
            token_cache,
            refresh_locks,
        }
    }

    /// Build the consent-screen URL for the authorization redirect.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        self.client.authorize_url(redirect_uri, state)
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given user,
    /// refreshing it first when it is within the expiry margin.
    ///
    /// Only one task per user performs a refresh; concurrent callers wait
    /// on the per-user lock and then pick up the cached result.
    pub async fn get_valid_access_token(&self, user_id: Uuid) -> Result<String, AppError> {
        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_SKEW_SECS);

        // Fast path: cached token still valid, no I/O.
        if let Some(cached) = self.token_cache.get(&user_id) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
            // Expiring soon - fall through to refresh
        }

        let lock = self
            .refresh_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: another task may have
        // refreshed while we were waiting.
        if let Some(cached) = self.token_cache.get(&user_id) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let account = self
            .store
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Linked account for user {user_id}")))?;

        let access_token = self.kms.decrypt(&account.access_token_encrypted).await?;

        let expires_at = parse_utc_rfc3339(&account.expires_at)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to parse token expiry")))?;

        if now + margin < expires_at {
            // Token is still valid - cache and return
            self.token_cache.insert(
                user_id,
                CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                },
            );
            return Ok(access_token);
        }

        tracing::info!(user_id = %user_id, "Access token expiring, refreshing");
        self.refresh_locked(&account).await
    }

    /// Refresh regardless of the recorded expiry. Used for the single
    /// permitted retry after a provider 401.
    async fn force_refresh(&self, user_id: Uuid) -> Result<String, AppError> {
        let lock = self
            .refresh_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        let account = self
            .store
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Linked account for user {user_id}")))?;

        self.refresh_locked(&account).await
    }

    /// Perform the refresh call and persist the rotated pair.
    /// Must be called with the per-user refresh lock held.
    async fn refresh_locked(&self, account: &StoredAccount) -> Result<String, AppError> {
        let user_id = account.user_id;
        let refresh_token = self.kms.decrypt(&account.refresh_token_encrypted).await?;

        let token = match self.client.refresh_token(&refresh_token).await {
            Ok(t) => t,
            Err(AppError::Refresh(msg)) => {
                // Fitbit refresh tokens rotate on use. If another server
                // instance already rotated the pair, adopt the winner's
                // tokens instead of unlinking.
                if let Some(latest) = self.store.load(user_id).await? {
                    if latest.refresh_token_encrypted != account.refresh_token_encrypted {
                        tracing::info!(
                            user_id = %user_id,
                            "Refresh race detected - another instance won, adopting its tokens"
                        );
                        return self.cache_from_account(&latest).await;
                    }
                }

                // The refresh token is dead: no further provider calls can
                // succeed, so the account transitions back to unlinked.
                self.store.clear(user_id).await?;
                self.token_cache.remove(&user_id);
                tracing::warn!(user_id = %user_id, "Refresh token rejected, account unlinked");
                return Err(AppError::Refresh(msg));
            }
            Err(e) => return Err(e),
        };

        let (enc_access, enc_refresh) =
            encrypt_tokens(&self.kms, &token.access_token, &token.refresh_token).await?;

        let expires_at = Utc::now() + Duration::seconds(token.expires_in);

        let mut updated = account.clone();
        updated.access_token_encrypted = enc_access;
        updated.refresh_token_encrypted = enc_refresh;
        updated.expires_at = format_utc_rfc3339(expires_at);

        self.store.save(&updated).await?;

        self.token_cache.insert(
            user_id,
            CachedToken {
                access_token: token.access_token.clone(),
                expires_at,
            },
        );

        tracing::info!(user_id = %user_id, "Token refreshed and cached");
        Ok(token.access_token)
    }

    /// Decrypt and cache the access token of an already-stored account.
    async fn cache_from_account(&self, account: &StoredAccount) -> Result<String, AppError> {
        let access_token = self.kms.decrypt(&account.access_token_encrypted).await?;
        let expires_at = parse_utc_rfc3339(&account.expires_at)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to parse token expiry")))?;

        self.token_cache.insert(
            account.user_id,
            CachedToken {
                access_token: access_token.clone(),
                expires_at,
            },
        );

        Ok(access_token)
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Handle the OAuth callback: exchange the code, fetch the profile,
    /// and persist the linked account.
    pub async fn handle_oauth_callback(
        &self,
        user_id: Uuid,
        code: &str,
        redirect_uri: &str,
    ) -> Result<LinkOutcome, AppError> {
        let token = self.client.exchange_code(code, redirect_uri).await?;

        // The token response already names the Fitbit user; the profile
        // call adds the display name shown in the dashboard.
        let profile = self.client.get_profile(&token.access_token).await?;

        let (enc_access, enc_refresh) =
            encrypt_tokens(&self.kms, &token.access_token, &token.refresh_token).await?;

        let now = Utc::now();
        let expires_at = now + Duration::seconds(token.expires_in);

        let scopes: Vec<String> = token
            .scope
            .as_deref()
            .unwrap_or(OAUTH_SCOPES)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let fitbit_user_id = token.user_id.unwrap_or_else(|| profile.encoded_id.clone());

        let account = StoredAccount::new(
            user_id,
            fitbit_user_id.clone(),
            Some(profile.display_name.clone()),
            enc_access,
            enc_refresh,
            expires_at,
            scopes,
            now,
        );

        self.store.save(&account).await?;

        self.token_cache.insert(
            user_id,
            CachedToken {
                access_token: token.access_token,
                expires_at,
            },
        );

        tracing::info!(
            user_id = %user_id,
            fitbit_user = %fitbit_user_id,
            display_name = %profile.display_name,
            "Fitbit account linked"
        );

        Ok(LinkOutcome {
            fitbit_user_id,
            display_name: profile.display_name,
        })
    }

    // ─── Disconnect ──────────────────────────────────────────────────────────

    /// Disconnect the user's Fitbit account.
    ///
    /// Revocation is best-effort: a stale token left active on the
    /// provider side is a lesser harm than blocking disconnect, so local
    /// state is cleared even when the revoke call fails. Calling this
    /// when already unlinked is a no-op success.
    pub async fn disconnect(&self, user_id: Uuid) -> Result<(), AppError> {
        let account = match self.store.load(user_id).await? {
            Some(a) => a,
            None => {
                tracing::debug!(user_id = %user_id, "Disconnect with no linked account (no-op)");
                return Ok(());
            }
        };

        match self.kms.decrypt(&account.access_token_encrypted).await {
            Ok(access_token) => {
                if let Err(e) = self.client.revoke(&access_token).await {
                    tracing::warn!(
                        error = %e,
                        user_id = %user_id,
                        "Fitbit revocation failed, clearing local state anyway"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user_id = %user_id,
                    "Failed to decrypt token for revocation, clearing local state anyway"
                );
            }
        }

        self.store.clear(user_id).await?;
        self.token_cache.remove(&user_id);
        self.refresh_locks.remove(&user_id);

        tracing::info!(user_id = %user_id, "Fitbit account disconnected");
        Ok(())
    }

    // ─── Data Fetching ───────────────────────────────────────────────────────

    /// Fetch normalized metric records for the requested range.
    ///
    /// On a provider 401 the token is force-refreshed and the fetch
    /// retried exactly once; any other failure is terminal for the call.
    pub async fn fetch_metric(
        &self,
        user_id: Uuid,
        request: &MetricRequest,
    ) -> Result<Vec<MetricRecord>, AppError> {
        let access_token = self.get_valid_access_token(user_id).await?;

        let records = match metrics::fetch(&self.client, &access_token, request).await {
            Ok(records) => records,
            Err(e) if e.is_provider_unauthorized() => {
                tracing::info!(
                    user_id = %user_id,
                    "Provider rejected access token, refreshing and retrying once"
                );
                let access_token = self.force_refresh(user_id).await?;
                metrics::fetch(&self.client, &access_token, request).await?
            }
            Err(e) => return Err(e),
        };

        self.store.record_sync(user_id, Utc::now()).await?;
        Ok(records)
    }

    /// Validate the link (refreshing the token if needed) and stamp the
    /// last-sync time.
    pub async fn sync(&self, user_id: Uuid) -> Result<DateTime<Utc>, AppError> {
        self.get_valid_access_token(user_id).await?;
        let now = Utc::now();
        self.store.record_sync(user_id, now).await?;
        Ok(now)
    }
}
