use super::*;

impl MfaService {
    /// Issues a fresh backup code batch, invalidating all prior codes.
    ///
    /// Requires enabled MFA; does not touch the attempt guard.
    pub async fn regenerate_backup_codes(&self, user_id: UserId) -> AppResult<Vec<String>> {
        let record = self
            .secret_store
            .find_secret(user_id)
            .await?
            .ok_or_else(|| AppError::InvalidState("MFA is not enabled".to_owned()))?;

        if !record.is_enabled {
            return Err(AppError::InvalidState(
                "MFA enrollment was never confirmed".to_owned(),
            ));
        }

        self.backup_codes.regenerate(user_id).await
    }

    /// Disables MFA, deleting the secret and all backup codes. Idempotent:
    /// disabling an account with no secret acks silently.
    pub async fn disable(&self, user_id: UserId) -> AppResult<()> {
        self.secret_store.delete_secret(user_id).await
    }

    /// Reports the enrollment lifecycle state and remaining backup codes.
    pub async fn status(&self, user_id: UserId) -> AppResult<MfaStatus> {
        let record = self.secret_store.find_secret(user_id).await?;
        let lifecycle = MfaLifecycle::of(record.as_ref());

        let backup_codes_remaining = if lifecycle == MfaLifecycle::Enabled {
            self.backup_codes.remaining(user_id).await?
        } else {
            0
        };

        Ok(MfaStatus {
            lifecycle,
            backup_codes_remaining,
        })
    }
}
