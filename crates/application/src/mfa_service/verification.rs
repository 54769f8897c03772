use super::*;

impl MfaService {
    /// Verifies a TOTP code during the login flow.
    ///
    /// Runs after the primary factor succeeded but before a session exists,
    /// so lockout is keyed by the caller-supplied pre-session `subject_key`
    /// rather than by the account itself.
    pub async fn verify_login(
        &self,
        user_id: UserId,
        subject_key: &SubjectKey,
        candidate: &str,
    ) -> AppResult<VerifiedSignal> {
        self.ensure_unlocked(subject_key).await?;

        let record = self.enabled_secret(user_id).await?;
        let secret_bytes = self.secret_encryptor.decrypt(&record.secret_enc)?;

        let Some(step) = self
            .totp_provider
            .matching_step(&secret_bytes, candidate, unix_now())?
        else {
            return Err(self.verification_failure(subject_key).await?);
        };

        // A step that was already accepted is a replay, not a valid login.
        if !self.secret_store.mark_step_used(user_id, step).await? {
            return Err(self.verification_failure(subject_key).await?);
        }

        self.attempt_guard.record_success(subject_key).await?;

        Ok(VerifiedSignal {
            user_id,
            second_factor: SecondFactor::Totp,
        })
    }

    /// Verifies a single-use backup code during the login flow.
    ///
    /// Success and failure feed the attempt guard exactly as TOTP
    /// verification does.
    pub async fn recover(
        &self,
        user_id: UserId,
        subject_key: &SubjectKey,
        recovery_code: &str,
    ) -> AppResult<VerifiedSignal> {
        self.ensure_unlocked(subject_key).await?;

        // The secret must be enabled; backup codes only exist past that point.
        self.enabled_secret(user_id).await?;

        if !self.backup_codes.consume(user_id, recovery_code).await? {
            return Err(self.verification_failure(subject_key).await?);
        }

        self.attempt_guard.record_success(subject_key).await?;

        Ok(VerifiedSignal {
            user_id,
            second_factor: SecondFactor::BackupCode,
        })
    }

    /// Loads the secret record, requiring the enabled state.
    async fn enabled_secret(&self, user_id: UserId) -> AppResult<MfaSecretRecord> {
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

        Ok(record)
    }
}
