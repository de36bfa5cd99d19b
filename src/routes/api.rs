// SPDX-License-Identifier: MIT

//! API routes for authenticated users.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{MetricKind, MetricRecord, MetricRequest, Period};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;

/// API routes (require authentication via session JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/sync", post(sync))
        .route("/api/disconnect", post(disconnect))
        .route("/api/data/{type}", get(get_data))
}

// ─── Connection Status ───────────────────────────────────────

/// Link state for the dashboard, with secrets stripped.
#[derive(Serialize)]
pub struct StatusResponse {
    pub is_linked: bool,
    pub last_synced_at: Option<String>,
    pub display_name: Option<String>,
}

/// Get the user's Fitbit link status.
///
/// A thin read of the credential store; token material never reaches
/// this response.
async fn get_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<StatusResponse>> {
    let response = match state.store.load(user.user_id).await? {
        Some(account) => StatusResponse {
            is_linked: true,
            last_synced_at: account.last_synced_at,
            display_name: account.display_name,
        },
        None => StatusResponse {
            is_linked: false,
            last_synced_at: None,
            display_name: None,
        },
    };

    Ok(Json(response))
}

// ─── Sync ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub last_synced_at: String,
}

/// Validate the link and stamp the last-sync time.
async fn sync(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SyncResponse>> {
    let synced_at = state.fitbit.sync(user.user_id).await?;

    Ok(Json(SyncResponse {
        success: true,
        last_synced_at: format_utc_rfc3339(synced_at),
    }))
}

// ─── Disconnect ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

/// Disconnect the user's Fitbit account (idempotent).
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DisconnectResponse>> {
    tracing::info!(user_id = %user.user_id, "User-initiated disconnect");
    state.fitbit.disconnect(user.user_id).await?;

    Ok(Json(DisconnectResponse { success: true }))
}

// ─── Metric Data ─────────────────────────────────────────────

#[derive(Deserialize)]
struct DataQuery {
    /// Lookback window: 7d, 14d, or 30d.
    #[serde(default = "default_period")]
    period: String,
}

fn default_period() -> String {
    "7d".to_string()
}

/// Get normalized metric records for the requested type and period.
///
/// An empty list means the provider had no data for the range; any
/// placeholder presentation is the UI's decision.
async fn get_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(metric_type): Path<String>,
    Query(params): Query<DataQuery>,
) -> Result<Json<Vec<MetricRecord>>> {
    let kind: MetricKind = metric_type.parse()?;
    let period: Period = params.period.parse()?;

    let request = MetricRequest::for_period(kind, period, chrono::Utc::now().date_naive());
    let records = state.fitbit.fetch_metric(user.user_id, &request).await?;

    Ok(Json(records))
}
