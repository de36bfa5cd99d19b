// SPDX-License-Identifier: MIT

//! Credential store layer.
//!
//! One `StoredAccount` record per user, dependency-injected behind the
//! [`CredentialStore`] trait so the HTTP layer never touches a concrete
//! backend. Firestore backs production; the in-memory store backs tests
//! and local development.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::StoredAccount;
use crate::time_utils::format_utc_rfc3339;

/// Collection names as constants.
pub mod collections {
    /// Linked Fitbit accounts (keyed by application user ID)
    pub const LINKED_ACCOUNTS: &str = "linked_accounts";
}

/// Durable, single-writer storage of one linked account per user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Upsert the account record.
    async fn save(&self, account: &StoredAccount) -> Result<(), AppError>;

    /// Load the account record, if the user has linked an account.
    async fn load(&self, user_id: Uuid) -> Result<Option<StoredAccount>, AppError>;

    /// Delete the account record. Call only after provider-side
    /// revocation has been attempted.
    async fn clear(&self, user_id: Uuid) -> Result<(), AppError>;

    /// Stamp `last_synced_at` after a successful fetch batch.
    async fn record_sync(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut account = self
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Linked account for user {user_id}")))?;
        account.last_synced_at = Some(format_utc_rfc3339(at));
        self.save(&account).await
    }
}
