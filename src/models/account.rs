// SPDX-License-Identifier: MIT

//! Linked Fitbit account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time_utils::format_utc_rfc3339;

/// A user's linked Fitbit account as persisted in the credential store.
///
/// The token pair is encrypted before it reaches the store, and neither
/// token ever leaves the server. Link state is exactly the presence of
/// this record: a stored account always carries both tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    /// Application user ID (also used as document ID)
    pub user_id: Uuid,
    /// Fitbit user ID (`encodedId` from the profile endpoint)
    pub fitbit_user_id: String,
    /// Display name from the Fitbit profile
    pub display_name: Option<String>,
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64)
    pub refresh_token_encrypted: String,
    /// When the access token expires (ISO 8601)
    pub expires_at: String,
    /// Granted OAuth scopes
    pub scopes: Vec<String>,
    /// When the account was linked (ISO 8601)
    pub linked_at: String,
    /// Last successful data sync (ISO 8601)
    pub last_synced_at: Option<String>,
}

impl StoredAccount {
    /// Build a freshly linked account. Both tokens are required, so a
    /// stored record can never exist in a half-linked state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        fitbit_user_id: String,
        display_name: Option<String>,
        access_token_encrypted: String,
        refresh_token_encrypted: String,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
        linked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            fitbit_user_id,
            display_name,
            access_token_encrypted,
            refresh_token_encrypted,
            expires_at: format_utc_rfc3339(expires_at),
            scopes,
            linked_at: format_utc_rfc3339(linked_at),
            last_synced_at: None,
        }
    }
}
