//! In-memory secret store implementation.
//!
//! Backs tests and local development; mirrors the guarded-update semantics
//! of the Postgres store with a write lock per map.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use stepauth_application::SecretStore;
use stepauth_core::AppResult;
use stepauth_domain::{BackupCode, MfaSecretRecord, UserId};

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<UserId, MfaSecretRecord>>,
    codes: RwLock<HashMap<UserId, Vec<BackupCode>>>,
}

impl InMemorySecretStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn find_secret(&self, user_id: UserId) -> AppResult<Option<MfaSecretRecord>> {
        let secrets = self.secrets.read().await;
        Ok(secrets.get(&user_id).cloned())
    }

    async fn put_pending_secret(&self, user_id: UserId, secret_enc: &[u8]) -> AppResult<()> {
        let mut secrets = self.secrets.write().await;
        let mut codes = self.codes.write().await;

        secrets.insert(
            user_id,
            MfaSecretRecord {
                user_id,
                secret_enc: secret_enc.to_vec(),
                is_enabled: false,
                last_used_step: None,
                created_at: Utc::now(),
                enabled_at: None,
            },
        );
        codes.remove(&user_id);

        Ok(())
    }

    async fn enable_secret(&self, user_id: UserId) -> AppResult<bool> {
        let mut secrets = self.secrets.write().await;

        match secrets.get_mut(&user_id) {
            Some(record) if !record.is_enabled => {
                record.is_enabled = true;
                record.enabled_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_secret(&self, user_id: UserId) -> AppResult<()> {
        self.secrets.write().await.remove(&user_id);
        self.codes.write().await.remove(&user_id);
        Ok(())
    }

    async fn mark_step_used(&self, user_id: UserId, step: i64) -> AppResult<bool> {
        let mut secrets = self.secrets.write().await;

        let Some(record) = secrets.get_mut(&user_id) else {
            return Ok(false);
        };

        if record.last_used_step.is_some_and(|used| used >= step) {
            return Ok(false);
        }

        record.last_used_step = Some(step);
        Ok(true)
    }

    async fn replace_backup_codes(&self, user_id: UserId, code_hashes: &[String]) -> AppResult<()> {
        let mut codes = self.codes.write().await;
        let now = Utc::now();

        codes.insert(
            user_id,
            code_hashes
                .iter()
                .map(|code_hash| BackupCode {
                    user_id,
                    code_hash: code_hash.clone(),
                    used_at: None,
                    created_at: now,
                })
                .collect(),
        );

        Ok(())
    }

    async fn consume_backup_code(&self, user_id: UserId, code_hash: &str) -> AppResult<bool> {
        let mut codes = self.codes.write().await;

        let Some(batch) = codes.get_mut(&user_id) else {
            return Ok(false);
        };

        for code in batch.iter_mut() {
            if code.code_hash == code_hash && code.used_at.is_none() {
                code.used_at = Some(Utc::now());
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn unused_backup_code_count(&self, user_id: UserId) -> AppResult<i64> {
        let codes = self.codes.read().await;

        Ok(codes
            .get(&user_id)
            .map(|batch| batch.iter().filter(|code| code.used_at.is_none()).count())
            .unwrap_or(0) as i64)
    }
}
