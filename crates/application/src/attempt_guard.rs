//! Failed-attempt counting and lockout.
//!
//! Implements the brute-force mitigation from the OWASP Authentication
//! cheat sheet: a durable per-subject counter with a cooldown lockout,
//! checked before any code comparison so a locked subject gets a uniform
//! "locked" response regardless of candidate correctness.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stepauth_core::{AppResult, SubjectKey};
use stepauth_domain::AttemptCounter;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Store port for attempt counter persistence.
///
/// Implementations must make `record_failure` atomic per subject key: a
/// burst of concurrent failing requests must not bypass the lockout
/// threshold through a read-modify-write race.
#[async_trait]
pub trait AttemptCounterStore: Send + Sync {
    /// Records a failed attempt in a single atomic update.
    ///
    /// If a previous lockout has already expired, the count restarts at 1.
    /// When the count reaches `max_failures`, sets
    /// `locked_until = now + cooldown_seconds`. Returns the updated counter.
    async fn record_failure(
        &self,
        subject_key: &SubjectKey,
        max_failures: i32,
        cooldown_seconds: i64,
    ) -> AppResult<AttemptCounter>;

    /// Returns the counter for the subject, if one exists.
    async fn find(&self, subject_key: &SubjectKey) -> AppResult<Option<AttemptCounter>>;

    /// Deletes the counter, clearing count and lockout.
    async fn reset(&self, subject_key: &SubjectKey) -> AppResult<()>;

    /// Removes counters with no failure recorded since the cutoff.
    async fn cleanup_idle(&self, before: DateTime<Utc>) -> AppResult<u64>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Lockout policy for the attempt guard.
#[derive(Debug, Clone)]
pub struct AttemptGuardConfig {
    /// Failures at which the subject is locked out.
    pub max_failures: i32,
    /// Lockout duration in seconds.
    pub cooldown_seconds: i64,
}

impl AttemptGuardConfig {
    /// Creates a lockout policy.
    #[must_use]
    pub fn new(max_failures: i32, cooldown_seconds: i64) -> Self {
        Self {
            max_failures,
            cooldown_seconds,
        }
    }
}

impl Default for AttemptGuardConfig {
    fn default() -> Self {
        Self::new(5, 300)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Outcome of a pre-verification guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    /// Verification may proceed.
    Allowed,
    /// The subject is locked out; no code comparison may run.
    Locked {
        /// Remaining cooldown in whole seconds.
        remaining_seconds: i64,
    },
}

/// Application service enforcing the lockout state machine per subject key.
#[derive(Clone)]
pub struct AttemptGuard {
    store: Arc<dyn AttemptCounterStore>,
    config: AttemptGuardConfig,
}

impl AttemptGuard {
    /// Creates a new attempt guard.
    #[must_use]
    pub fn new(store: Arc<dyn AttemptCounterStore>, config: AttemptGuardConfig) -> Self {
        Self { store, config }
    }

    /// Checks whether verification may proceed for the subject.
    ///
    /// A missing counter or an expired lockout both mean `Allowed`; the
    /// counter itself resets lazily on the next recorded failure.
    pub async fn check(&self, subject_key: &SubjectKey) -> AppResult<AttemptDecision> {
        let Some(counter) = self.store.find(subject_key).await? else {
            return Ok(AttemptDecision::Allowed);
        };

        match counter.remaining_lockout_seconds(Utc::now()) {
            Some(remaining_seconds) => Ok(AttemptDecision::Locked { remaining_seconds }),
            None => Ok(AttemptDecision::Allowed),
        }
    }

    /// Records a failed verification attempt.
    pub async fn record_failure(&self, subject_key: &SubjectKey) -> AppResult<AttemptCounter> {
        self.store
            .record_failure(
                subject_key,
                self.config.max_failures,
                self.config.cooldown_seconds,
            )
            .await
    }

    /// Resets the counter after a successful verification.
    pub async fn record_success(&self, subject_key: &SubjectKey) -> AppResult<()> {
        self.store.reset(subject_key).await
    }

    /// Removes counters idle for more than a day. Intended for periodic
    /// cleanup; an evicted counter defaults to "no lockout".
    pub async fn cleanup(&self) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        self.store.cleanup_idle(cutoff).await
    }
}
