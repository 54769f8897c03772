use super::*;

impl PostgresSecretStore {
    pub(super) async fn replace_backup_codes_impl(
        &self,
        user_id: UserId,
        code_hashes: &[String],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            AppError::Storage(format!("failed to begin transaction: {error}"))
        })?;

        sqlx::query("DELETE FROM mfa_backup_codes WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to clear backup codes: {error}"))
            })?;

        for code_hash in code_hashes {
            sqlx::query(
                r#"
                INSERT INTO mfa_backup_codes (user_id, code_hash, created_at)
                VALUES ($1, $2, now())
                "#,
            )
            .bind(user_id.as_uuid())
            .bind(code_hash)
            .execute(&mut *tx)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to store backup code: {error}"))
            })?;
        }

        tx.commit()
            .await
            .map_err(|error| AppError::Storage(format!("failed to commit transaction: {error}")))
    }

    pub(super) async fn consume_backup_code_impl(
        &self,
        user_id: UserId,
        code_hash: &str,
    ) -> AppResult<bool> {
        // Single guarded UPDATE: two concurrent spends of the same code
        // cannot both match the `used_at IS NULL` predicate.
        let result = sqlx::query(
            r#"
            UPDATE mfa_backup_codes
            SET used_at = now()
            WHERE user_id = $1 AND code_hash = $2 AND used_at IS NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(code_hash)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to consume backup code: {error}")))?;

        Ok(result.rows_affected() == 1)
    }

    pub(super) async fn unused_backup_code_count_impl(&self, user_id: UserId) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM mfa_backup_codes
            WHERE user_id = $1 AND used_at IS NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to count backup codes: {error}")))?;

        Ok(count)
    }
}
