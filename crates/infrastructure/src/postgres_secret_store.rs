//! PostgreSQL-backed secret store over the `mfa_secrets` and
//! `mfa_backup_codes` tables.
//!
//! Every state transition with a concurrency invariant (enable, step
//! replay, code consumption) is a single guarded UPDATE, so the database
//! arbitrates races between concurrent requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use stepauth_application::SecretStore;
use stepauth_core::{AppError, AppResult};
use stepauth_domain::{MfaSecretRecord, UserId};

mod backup_codes;
mod secrets;

/// PostgreSQL implementation of the secret store port.
#[derive(Clone)]
pub struct PostgresSecretStore {
    pool: PgPool,
}

impl PostgresSecretStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PostgresSecretStore {
    async fn find_secret(&self, user_id: UserId) -> AppResult<Option<MfaSecretRecord>> {
        self.find_secret_impl(user_id).await
    }

    async fn put_pending_secret(&self, user_id: UserId, secret_enc: &[u8]) -> AppResult<()> {
        self.put_pending_secret_impl(user_id, secret_enc).await
    }

    async fn enable_secret(&self, user_id: UserId) -> AppResult<bool> {
        self.enable_secret_impl(user_id).await
    }

    async fn delete_secret(&self, user_id: UserId) -> AppResult<()> {
        self.delete_secret_impl(user_id).await
    }

    async fn mark_step_used(&self, user_id: UserId, step: i64) -> AppResult<bool> {
        self.mark_step_used_impl(user_id, step).await
    }

    async fn replace_backup_codes(&self, user_id: UserId, code_hashes: &[String]) -> AppResult<()> {
        self.replace_backup_codes_impl(user_id, code_hashes).await
    }

    async fn consume_backup_code(&self, user_id: UserId, code_hash: &str) -> AppResult<bool> {
        self.consume_backup_code_impl(user_id, code_hash).await
    }

    async fn unused_backup_code_count(&self, user_id: UserId) -> AppResult<i64> {
        self.unused_backup_code_count_impl(user_id).await
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SecretRow {
    user_id: uuid::Uuid,
    secret_enc: Vec<u8>,
    is_enabled: bool,
    last_used_step: Option<i64>,
    created_at: DateTime<Utc>,
    enabled_at: Option<DateTime<Utc>>,
}

impl From<SecretRow> for MfaSecretRecord {
    fn from(row: SecretRow) -> Self {
        Self {
            user_id: UserId::from_uuid(row.user_id),
            secret_enc: row.secret_enc,
            is_enabled: row.is_enabled,
            last_used_step: row.last_used_step,
            created_at: row.created_at,
            enabled_at: row.enabled_at,
        }
    }
}
