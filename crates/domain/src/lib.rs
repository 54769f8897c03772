//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod mfa;
mod user;

pub use mfa::{AttemptCounter, BackupCode, MfaLifecycle, MfaSecretRecord, SecondFactor};
pub use user::UserId;
