use super::*;

impl MfaService {
    /// Starts TOTP enrollment for a user.
    ///
    /// Provisions a fresh pending secret, replacing any earlier pending or
    /// enabled one so no half-enrolled secrets linger. The secret only
    /// becomes active once `verify_setup` confirms a code from the user's
    /// authenticator.
    pub async fn initiate_setup(&self, user_id: UserId) -> AppResult<TotpEnrollment> {
        let (secret_bytes, secret_base32, otpauth_uri) = self
            .totp_provider
            .generate_secret(&user_id.to_string())?;

        let secret_enc = self.secret_encryptor.encrypt(&secret_bytes)?;

        self.secret_store
            .put_pending_secret(user_id, &secret_enc)
            .await?;

        Ok(TotpEnrollment {
            secret_base32,
            otpauth_uri,
        })
    }

    /// Confirms enrollment with a code from the user's authenticator.
    ///
    /// On success the secret becomes enabled and the initial backup code
    /// batch is generated; the returned plaintext codes are shown exactly
    /// once. Failures feed the attempt guard like any other verification.
    pub async fn verify_setup(&self, user_id: UserId, candidate: &str) -> AppResult<Vec<String>> {
        let subject_key = Self::setup_subject_key(user_id)?;
        self.ensure_unlocked(&subject_key).await?;

        let record = self
            .secret_store
            .find_secret(user_id)
            .await?
            .ok_or_else(|| AppError::InvalidState("no enrollment in progress".to_owned()))?;

        if record.is_enabled {
            return Err(AppError::InvalidState(
                "MFA is already enabled for this account".to_owned(),
            ));
        }

        let secret_bytes = self.secret_encryptor.decrypt(&record.secret_enc)?;

        let Some(step) = self
            .totp_provider
            .matching_step(&secret_bytes, candidate, unix_now())?
        else {
            return Err(self.verification_failure(&subject_key).await?);
        };

        // CAS: a concurrent verify_setup may have enabled the secret first.
        // Only the winner generates the backup code batch.
        if !self.secret_store.enable_secret(user_id).await? {
            return Err(AppError::InvalidState(
                "enrollment was already confirmed".to_owned(),
            ));
        }

        self.secret_store.mark_step_used(user_id, step).await?;

        let backup_codes = self.backup_codes.generate(user_id).await?;
        self.attempt_guard.record_success(&subject_key).await?;

        Ok(backup_codes)
    }
}
