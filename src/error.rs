// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.
//!
//! Provider-facing failures follow a fixed taxonomy: a failed code
//! exchange is terminal for the link attempt, a rejected refresh token
//! unlinks the account, and data-fetch failures are per-request only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired session token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Authorization-code exchange failed. Codes are single-use, so this
    /// is never retried; the user must restart the link flow.
    #[error("Authorization code exchange failed: {0}")]
    AuthExchange(String),

    /// The provider rejected the refresh token. Credentials are cleared
    /// and the user must reconnect the account.
    #[error("Token refresh rejected: {0}")]
    Refresh(String),

    /// A provider data call returned non-2xx, or failed at the transport
    /// level (`status == 0` for timeout/DNS failures).
    #[error("Fitbit API error (HTTP {status}): {body}")]
    Fetch { status: u16, body: String },

    #[error("Storage error: {0}")]
    Persistence(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Build a `Fetch` error from a transport-level failure.
    pub fn transport(err: &reqwest::Error) -> Self {
        AppError::Fetch {
            status: 0,
            body: err.to_string(),
        }
    }

    /// Whether this is a provider 401 (expired/revoked access token).
    pub fn is_provider_unauthorized(&self) -> bool {
        matches!(self, AppError::Fetch { status: 401, .. })
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::AuthExchange(msg) => (
                StatusCode::BAD_GATEWAY,
                "auth_exchange_failed",
                Some(msg.clone()),
            ),
            AppError::Refresh(msg) => {
                // The account was unlinked; the client must restart the flow.
                (StatusCode::UNAUTHORIZED, "reconnect_required", Some(msg.clone()))
            }
            AppError::Fetch { status, body } => {
                tracing::warn!(provider_status = status, body = %body, "Fitbit API error");
                (StatusCode::BAD_GATEWAY, "fitbit_error", Some(body.clone()))
            }
            AppError::Persistence(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
