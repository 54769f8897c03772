use super::*;

impl PostgresSecretStore {
    pub(super) async fn find_secret_impl(
        &self,
        user_id: UserId,
    ) -> AppResult<Option<MfaSecretRecord>> {
        let row = sqlx::query_as::<_, SecretRow>(
            r#"
            SELECT user_id, secret_enc, is_enabled, last_used_step, created_at, enabled_at
            FROM mfa_secrets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to load MFA secret: {error}")))?;

        Ok(row.map(MfaSecretRecord::from))
    }

    pub(super) async fn put_pending_secret_impl(
        &self,
        user_id: UserId,
        secret_enc: &[u8],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            AppError::Storage(format!("failed to begin transaction: {error}"))
        })?;

        // Re-enrollment drops the previous batch of backup codes.
        sqlx::query("DELETE FROM mfa_backup_codes WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to clear backup codes: {error}"))
            })?;

        sqlx::query(
            r#"
            INSERT INTO mfa_secrets (user_id, secret_enc, is_enabled, created_at)
            VALUES ($1, $2, FALSE, now())
            ON CONFLICT (user_id) DO UPDATE
            SET secret_enc = $2,
                is_enabled = FALSE,
                last_used_step = NULL,
                created_at = now(),
                enabled_at = NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(secret_enc)
        .execute(&mut *tx)
        .await
        .map_err(|error| AppError::Storage(format!("failed to store MFA secret: {error}")))?;

        tx.commit()
            .await
            .map_err(|error| AppError::Storage(format!("failed to commit transaction: {error}")))
    }

    pub(super) async fn enable_secret_impl(&self, user_id: UserId) -> AppResult<bool> {
        // Guarded update: only one of two racing verify_setup calls flips
        // the flag.
        let result = sqlx::query(
            r#"
            UPDATE mfa_secrets
            SET is_enabled = TRUE, enabled_at = now()
            WHERE user_id = $1 AND is_enabled = FALSE
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to enable MFA secret: {error}")))?;

        Ok(result.rows_affected() == 1)
    }

    pub(super) async fn delete_secret_impl(&self, user_id: UserId) -> AppResult<()> {
        // Backup codes cascade with the secret row.
        sqlx::query("DELETE FROM mfa_secrets WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Storage(format!("failed to delete MFA secret: {error}")))?;

        Ok(())
    }

    pub(super) async fn mark_step_used_impl(&self, user_id: UserId, step: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_secrets
            SET last_used_step = $2
            WHERE user_id = $1
              AND (last_used_step IS NULL OR last_used_step < $2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(step)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to record used step: {error}")))?;

        Ok(result.rows_affected() == 1)
    }
}
