//! MFA (TOTP) enrollment, verification, and recovery.
//!
//! Follows OWASP Multifactor Authentication Cheat Sheet:
//! - TOTP codes are 6-digit, 30-second step, +/-1 step tolerance.
//! - Backup codes are single-use, stored hashed.
//! - Every verification path runs the attempt guard first and feeds it the
//!   outcome, so lockout applies uniformly to codes and backup codes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use stepauth_core::{AppError, AppResult, SubjectKey};
use stepauth_domain::{MfaLifecycle, MfaSecretRecord, SecondFactor, UserId};

use crate::attempt_guard::{AttemptDecision, AttemptGuard};
use crate::backup_codes::BackupCodeManager;

/// TOTP provisioning data returned to the user for QR code display.
///
/// This is the only place the raw secret ever travels back to a client,
/// embedded in the otpauth URI.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    /// Base32-encoded TOTP secret for manual entry.
    pub secret_base32: String,
    /// otpauth:// URI for QR code generation.
    pub otpauth_uri: String,
}

/// Emitted when a second factor verifies. The session issuer consumes this
/// to mint credentials; this core never issues tokens itself.
#[derive(Debug, Clone)]
pub struct VerifiedSignal {
    /// The verified account.
    pub user_id: UserId,
    /// Which factor satisfied the challenge.
    pub second_factor: SecondFactor,
}

/// Enrollment state as rendered by the settings UI.
#[derive(Debug, Clone)]
pub struct MfaStatus {
    /// Current lifecycle state.
    pub lifecycle: MfaLifecycle,
    /// Unused backup codes left; zero unless enabled.
    pub backup_codes_remaining: i64,
}

/// Port for TOTP operations. Infrastructure provides the actual RFC 6238
/// implementation.
///
/// Code matching is pure in the supplied unix time, which keeps the drift
/// window testable at fixed instants.
#[async_trait]
pub trait TotpProvider: Send + Sync {
    /// Generates a new TOTP secret and returns
    /// `(secret_bytes, base32_string, otpauth_uri)` for the account label.
    fn generate_secret(&self, account: &str) -> AppResult<(Vec<u8>, String, String)>;

    /// Returns the time step whose code matches the candidate, checking the
    /// current step and its drift neighbors. `None` for malformed
    /// candidates or no match; never an error for bad input.
    fn matching_step(
        &self,
        secret_bytes: &[u8],
        candidate: &str,
        unix_time: i64,
    ) -> AppResult<Option<i64>>;

    /// The code for the step containing `unix_time`, zero-padded.
    fn code_at(&self, secret_bytes: &[u8], unix_time: i64) -> AppResult<String>;
}

/// Port for encrypting/decrypting TOTP secrets at rest.
#[async_trait]
pub trait SecretEncryptor: Send + Sync {
    /// Encrypts a TOTP secret for database storage.
    fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>>;

    /// Decrypts a stored TOTP secret.
    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<Vec<u8>>;
}

/// Store port owning persistence of secrets and backup codes.
///
/// All state transitions with concurrency invariants (enable, step replay,
/// code consumption) are single compare-and-swap operations here, so two
/// racing requests cannot both win.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the user's secret record, if any.
    async fn find_secret(&self, user_id: UserId) -> AppResult<Option<MfaSecretRecord>>;

    /// Stores a fresh pending (not enabled) secret, replacing any existing
    /// secret and deleting the user's backup codes in the same transaction.
    async fn put_pending_secret(&self, user_id: UserId, secret_enc: &[u8]) -> AppResult<()>;

    /// Flips a pending secret to enabled. Returns `false` when there is no
    /// secret or it is already enabled (a concurrent call won the race).
    async fn enable_secret(&self, user_id: UserId) -> AppResult<bool>;

    /// Deletes the secret and all backup codes. Idempotent.
    async fn delete_secret(&self, user_id: UserId) -> AppResult<()>;

    /// Advances the last accepted time step. Returns `false` when the step
    /// was already used, i.e. a replay within the validity window.
    async fn mark_step_used(&self, user_id: UserId, step: i64) -> AppResult<bool>;

    /// Replaces the user's backup codes with a new hashed batch.
    async fn replace_backup_codes(&self, user_id: UserId, code_hashes: &[String]) -> AppResult<()>;

    /// Marks a single matching unused code as used. Returns `false` when no
    /// unused code matches. Atomic with respect to concurrent calls.
    async fn consume_backup_code(&self, user_id: UserId, code_hash: &str) -> AppResult<bool>;

    /// Counts unused backup codes for the user.
    async fn unused_backup_code_count(&self, user_id: UserId) -> AppResult<i64>;
}

/// Application service orchestrating the MFA state machine.
#[derive(Clone)]
pub struct MfaService {
    secret_store: Arc<dyn SecretStore>,
    totp_provider: Arc<dyn TotpProvider>,
    secret_encryptor: Arc<dyn SecretEncryptor>,
    backup_codes: BackupCodeManager,
    attempt_guard: AttemptGuard,
}

impl MfaService {
    /// Creates a new MFA service.
    #[must_use]
    pub fn new(
        secret_store: Arc<dyn SecretStore>,
        totp_provider: Arc<dyn TotpProvider>,
        secret_encryptor: Arc<dyn SecretEncryptor>,
        backup_codes: BackupCodeManager,
        attempt_guard: AttemptGuard,
    ) -> Self {
        Self {
            secret_store,
            totp_provider,
            secret_encryptor,
            backup_codes,
            attempt_guard,
        }
    }

    /// Refuses with `Locked` before any secret access or code comparison.
    async fn ensure_unlocked(&self, subject_key: &SubjectKey) -> AppResult<()> {
        match self.attempt_guard.check(subject_key).await? {
            AttemptDecision::Allowed => Ok(()),
            AttemptDecision::Locked { remaining_seconds } => {
                Err(AppError::Locked(remaining_seconds))
            }
        }
    }

    /// Records a failure and picks the response for this attempt: `Locked`
    /// when this very failure tripped the threshold, `InvalidCode` otherwise.
    async fn verification_failure(&self, subject_key: &SubjectKey) -> AppResult<AppError> {
        let counter = self.attempt_guard.record_failure(subject_key).await?;
        match counter.remaining_lockout_seconds(Utc::now()) {
            Some(remaining_seconds) => Ok(AppError::Locked(remaining_seconds)),
            None => Ok(AppError::InvalidCode),
        }
    }

    /// Lockout key for enrollment attempts, where the user is already
    /// authenticated with the primary factor.
    fn setup_subject_key(user_id: UserId) -> AppResult<SubjectKey> {
        SubjectKey::new(format!("setup:{user_id}"))
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

mod enrollment;
mod management;
mod verification;

#[cfg(test)]
mod tests;
