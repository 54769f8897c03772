//! MFA records as persisted by the secret and attempt stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Lifecycle state of a user's second factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaLifecycle {
    /// No secret exists for the user.
    NotEnrolled,
    /// A secret was provisioned but never confirmed with a valid code.
    PendingVerification,
    /// Enrollment completed; login requires a second factor.
    Enabled,
}

impl MfaLifecycle {
    /// Derives the lifecycle state from an optional stored secret.
    #[must_use]
    pub fn of(record: Option<&MfaSecretRecord>) -> Self {
        match record {
            None => Self::NotEnrolled,
            Some(secret) if secret.is_enabled => Self::Enabled,
            Some(_) => Self::PendingVerification,
        }
    }
}

/// Which second factor satisfied a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactor {
    /// A time-based one-time code.
    Totp,
    /// A single-use backup code.
    BackupCode,
}

/// TOTP secret record. One active secret per user; the raw secret is
/// encrypted at rest and only ever leaves the store during setup, embedded
/// in the provisioning URI.
#[derive(Debug, Clone)]
pub struct MfaSecretRecord {
    /// Owning account.
    pub user_id: UserId,
    /// Encrypted secret bytes (nonce-prefixed AES-GCM ciphertext).
    pub secret_enc: Vec<u8>,
    /// False until enrollment is confirmed with a valid code.
    pub is_enabled: bool,
    /// Highest time step already accepted for this user. Blocks replay of a
    /// code within its validity window.
    pub last_used_step: Option<i64>,
    /// When the secret was provisioned.
    pub created_at: DateTime<Utc>,
    /// When enrollment was confirmed, if ever.
    pub enabled_at: Option<DateTime<Utc>>,
}

/// A hashed single-use recovery code.
#[derive(Debug, Clone)]
pub struct BackupCode {
    /// Owning account.
    pub user_id: UserId,
    /// SHA-256 hex digest of the plaintext code.
    pub code_hash: String,
    /// When the code was consumed. Set exactly once; a used code must never
    /// verify again.
    pub used_at: Option<DateTime<Utc>>,
    /// When the batch was generated.
    pub created_at: DateTime<Utc>,
}

/// Per-subject failed-verification counter with lockout.
#[derive(Debug, Clone)]
pub struct AttemptCounter {
    /// Lockout key (user id during enrollment, pre-session key during login).
    pub subject_key: String,
    /// Consecutive failures in the current window.
    pub failure_count: i32,
    /// Until when verification is refused. Cleared on success; ignored once
    /// in the past.
    pub locked_until: Option<DateTime<Utc>>,
    /// Last failure timestamp, used to evict idle counters.
    pub last_failure_at: DateTime<Utc>,
}

impl AttemptCounter {
    /// Remaining lockout in whole seconds at `now`, if any.
    #[must_use]
    pub fn remaining_lockout_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        let until = self.locked_until?;
        let remaining = (until - now).num_seconds();
        (remaining > 0).then_some(remaining)
    }
}
