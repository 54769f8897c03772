//! Shared primitives for all Rust crates in Stepauth.

#![forbid(unsafe_code)]

/// Authentication primitives shared across services.
pub mod auth;

use thiserror::Error;

pub use auth::SubjectKey;

/// Result type used across Stepauth crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error categories.
///
/// `InvalidCode`, `Locked`, and `InvalidState` are the three outcomes the
/// calling UI must distinguish: retry, wait, or start the flow over.
#[derive(Debug, Error)]
pub enum AppError {
    /// Candidate did not match any acceptable time step or backup code.
    ///
    /// Deliberately carries no detail: "wrong code" and "right code, wrong
    /// account" must be indistinguishable to the caller.
    #[error("invalid code")]
    InvalidCode,

    /// Verification refused because the subject is locked out. Carries the
    /// remaining cooldown in seconds for the UI countdown.
    #[error("too many failed attempts, retry in {0} seconds")]
    Locked(i64),

    /// Operation invoked against a secret not in the required lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Persistence layer failure. Retryable; never exposes internals beyond
    /// the wrapped message, which stays server-side.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}
