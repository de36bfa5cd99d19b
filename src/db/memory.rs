// SPDX-License-Identifier: MIT

//! In-memory credential store for tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::StoredAccount;

/// Credential store backed by a process-local map. Not durable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    accounts: Arc<RwLock<HashMap<Uuid, StoredAccount>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save(&self, account: &StoredAccount) -> Result<(), AppError> {
        self.accounts
            .write()
            .await
            .insert(account.user_id, account.clone());
        Ok(())
    }

    async fn load(&self, user_id: Uuid) -> Result<Option<StoredAccount>, AppError> {
        Ok(self.accounts.read().await.get(&user_id).cloned())
    }

    async fn clear(&self, user_id: Uuid) -> Result<(), AppError> {
        self.accounts.write().await.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_account(user_id: Uuid) -> StoredAccount {
        StoredAccount::new(
            user_id,
            "FB123".to_string(),
            Some("Test User".to_string()),
            "enc_access".to_string(),
            "enc_refresh".to_string(),
            Utc::now() + chrono::Duration::hours(8),
            vec!["activity".to_string(), "sleep".to_string()],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_save_load_clear_roundtrip() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        assert!(store.load(user_id).await.unwrap().is_none());

        store.save(&sample_account(user_id)).await.unwrap();
        let loaded = store.load(user_id).await.unwrap().unwrap();
        assert_eq!(loaded.fitbit_user_id, "FB123");
        assert_eq!(loaded.last_synced_at, None);

        store.clear(user_id).await.unwrap();
        assert!(store.load(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_sync_stamps_timestamp() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.save(&sample_account(user_id)).await.unwrap();

        let at = Utc::now();
        store.record_sync(user_id, at).await.unwrap();

        let loaded = store.load(user_id).await.unwrap().unwrap();
        assert!(loaded.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_record_sync_requires_linked_account() {
        let store = MemoryStore::new();
        let result = store.record_sync(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
