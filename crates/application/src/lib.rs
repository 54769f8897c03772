//! Application services and ports.

#![forbid(unsafe_code)]

mod attempt_guard;
mod backup_codes;
mod mfa_service;

pub use attempt_guard::{AttemptCounterStore, AttemptDecision, AttemptGuard, AttemptGuardConfig};
pub use backup_codes::{BackupCodeManager, DEFAULT_BACKUP_CODE_COUNT};
pub use mfa_service::{
    MfaService, MfaStatus, SecretEncryptor, SecretStore, TotpEnrollment, TotpProvider,
    VerifiedSignal,
};
