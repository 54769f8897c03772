use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use stepauth_core::{AppError, AppResult, SubjectKey};
use stepauth_domain::{AttemptCounter, MfaLifecycle, MfaSecretRecord, SecondFactor, UserId};

use crate::attempt_guard::{AttemptCounterStore, AttemptGuard, AttemptGuardConfig};
use crate::backup_codes::BackupCodeManager;

use super::{MfaService, SecretEncryptor, SecretStore, TotpProvider};

const VALID_CODE: &str = "123456";

fn expect_ok<T>(result: AppResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("unexpected error: {error}"),
    }
}

fn subject(value: &str) -> SubjectKey {
    expect_ok(SubjectKey::new(value))
}

// ---------------------------------------------------------------------------
// Port fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemorySecretStore {
    secrets: Mutex<HashMap<UserId, MfaSecretRecord>>,
    codes: Mutex<HashMap<UserId, Vec<(String, Option<DateTime<Utc>>)>>>,
}

fn lock_error<T>(error: T) -> AppError
where
    T: std::fmt::Display,
{
    AppError::Internal(format!("failed to lock store state: {error}"))
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn find_secret(&self, user_id: UserId) -> AppResult<Option<MfaSecretRecord>> {
        let secrets = self.secrets.lock().map_err(lock_error)?;
        Ok(secrets.get(&user_id).cloned())
    }

    async fn put_pending_secret(&self, user_id: UserId, secret_enc: &[u8]) -> AppResult<()> {
        let mut secrets = self.secrets.lock().map_err(lock_error)?;
        let mut codes = self.codes.lock().map_err(lock_error)?;

        secrets.insert(
            user_id,
            MfaSecretRecord {
                user_id,
                secret_enc: secret_enc.to_vec(),
                is_enabled: false,
                last_used_step: None,
                created_at: Utc::now(),
                enabled_at: None,
            },
        );
        codes.remove(&user_id);
        Ok(())
    }

    async fn enable_secret(&self, user_id: UserId) -> AppResult<bool> {
        let mut secrets = self.secrets.lock().map_err(lock_error)?;
        match secrets.get_mut(&user_id) {
            Some(record) if !record.is_enabled => {
                record.is_enabled = true;
                record.enabled_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_secret(&self, user_id: UserId) -> AppResult<()> {
        self.secrets.lock().map_err(lock_error)?.remove(&user_id);
        self.codes.lock().map_err(lock_error)?.remove(&user_id);
        Ok(())
    }

    async fn mark_step_used(&self, user_id: UserId, step: i64) -> AppResult<bool> {
        let mut secrets = self.secrets.lock().map_err(lock_error)?;
        let Some(record) = secrets.get_mut(&user_id) else {
            return Ok(false);
        };

        if record.last_used_step.is_some_and(|used| used >= step) {
            return Ok(false);
        }

        record.last_used_step = Some(step);
        Ok(true)
    }

    async fn replace_backup_codes(
        &self,
        user_id: UserId,
        code_hashes: &[String],
    ) -> AppResult<()> {
        let mut codes = self.codes.lock().map_err(lock_error)?;
        codes.insert(
            user_id,
            code_hashes.iter().map(|hash| (hash.clone(), None)).collect(),
        );
        Ok(())
    }

    async fn consume_backup_code(&self, user_id: UserId, code_hash: &str) -> AppResult<bool> {
        let mut codes = self.codes.lock().map_err(lock_error)?;
        let Some(batch) = codes.get_mut(&user_id) else {
            return Ok(false);
        };

        for (hash, used_at) in batch.iter_mut() {
            if hash == code_hash && used_at.is_none() {
                *used_at = Some(Utc::now());
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn unused_backup_code_count(&self, user_id: UserId) -> AppResult<i64> {
        let codes = self.codes.lock().map_err(lock_error)?;
        Ok(codes
            .get(&user_id)
            .map(|batch| batch.iter().filter(|(_, used_at)| used_at.is_none()).count())
            .unwrap_or(0) as i64)
    }
}

#[derive(Default)]
struct MemoryAttemptStore {
    counters: Mutex<HashMap<String, AttemptCounter>>,
}

#[async_trait]
impl AttemptCounterStore for MemoryAttemptStore {
    async fn record_failure(
        &self,
        subject_key: &SubjectKey,
        max_failures: i32,
        cooldown_seconds: i64,
    ) -> AppResult<AttemptCounter> {
        let mut counters = self.counters.lock().map_err(lock_error)?;
        let now = Utc::now();

        let entry = counters
            .entry(subject_key.as_str().to_owned())
            .or_insert_with(|| AttemptCounter {
                subject_key: subject_key.as_str().to_owned(),
                failure_count: 0,
                locked_until: None,
                last_failure_at: now,
            });

        if entry.locked_until.is_some_and(|until| until <= now) {
            entry.failure_count = 0;
            entry.locked_until = None;
        }

        entry.failure_count += 1;
        entry.last_failure_at = now;
        if entry.failure_count >= max_failures {
            entry.locked_until = Some(now + Duration::seconds(cooldown_seconds));
        }

        Ok(entry.clone())
    }

    async fn find(&self, subject_key: &SubjectKey) -> AppResult<Option<AttemptCounter>> {
        let counters = self.counters.lock().map_err(lock_error)?;
        Ok(counters.get(subject_key.as_str()).cloned())
    }

    async fn reset(&self, subject_key: &SubjectKey) -> AppResult<()> {
        self.counters
            .lock()
            .map_err(lock_error)?
            .remove(subject_key.as_str());
        Ok(())
    }

    async fn cleanup_idle(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut counters = self.counters.lock().map_err(lock_error)?;
        let initial = counters.len();
        counters.retain(|_, counter| counter.last_failure_at >= before);
        Ok((initial - counters.len()) as u64)
    }
}

/// Accepts exactly `VALID_CODE` and reports the step for the supplied time,
/// so replay behavior matches the real provider. Tests advance the step
/// offset to simulate the clock crossing into the next time window.
#[derive(Default)]
struct StubTotpProvider {
    step_offset: AtomicI64,
}

impl StubTotpProvider {
    fn advance_step(&self) {
        self.step_offset.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TotpProvider for StubTotpProvider {
    fn generate_secret(&self, account: &str) -> AppResult<(Vec<u8>, String, String)> {
        Ok((
            b"stub-secret-bytes-20".to_vec(),
            "JBSWY3DPEHPK3PXP".to_owned(),
            format!(
                "otpauth://totp/Stepauth:{account}?secret=JBSWY3DPEHPK3PXP&issuer=Stepauth&digits=6&period=30"
            ),
        ))
    }

    fn matching_step(
        &self,
        _secret_bytes: &[u8],
        candidate: &str,
        unix_time: i64,
    ) -> AppResult<Option<i64>> {
        let offset = self.step_offset.load(Ordering::SeqCst);
        Ok((candidate == VALID_CODE).then_some(unix_time / 30 + offset))
    }

    fn code_at(&self, _secret_bytes: &[u8], _unix_time: i64) -> AppResult<String> {
        Ok(VALID_CODE.to_owned())
    }
}

struct PlainSecretEncryptor;

#[async_trait]
impl SecretEncryptor for PlainSecretEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    service: MfaService,
    attempt_store: Arc<MemoryAttemptStore>,
    totp_provider: Arc<StubTotpProvider>,
}

fn harness() -> Harness {
    let secret_store = Arc::new(MemorySecretStore::default());
    let attempt_store = Arc::new(MemoryAttemptStore::default());
    let totp_provider = Arc::new(StubTotpProvider::default());

    let service = MfaService::new(
        secret_store.clone(),
        totp_provider.clone(),
        Arc::new(PlainSecretEncryptor),
        BackupCodeManager::new(secret_store, 10),
        AttemptGuard::new(attempt_store.clone(), AttemptGuardConfig::default()),
    );

    Harness {
        service,
        attempt_store,
        totp_provider,
    }
}

async fn enroll(harness: &Harness, user_id: UserId) -> Vec<String> {
    let enrollment = expect_ok(harness.service.initiate_setup(user_id).await);
    assert!(enrollment.otpauth_uri.starts_with("otpauth://totp/"));
    let backup_codes = expect_ok(harness.service.verify_setup(user_id, VALID_CODE).await);

    // The confirmation consumed the current time step; move to the next
    // window so login tests do not collide with it.
    harness.totp_provider.advance_step();

    backup_codes
}

// ---------------------------------------------------------------------------
// Enrollment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enrollment_flow_enables_mfa_and_issues_backup_codes() {
    let harness = harness();
    let user_id = UserId::new();

    let backup_codes = enroll(&harness, user_id).await;
    assert_eq!(backup_codes.len(), 10);

    let status = expect_ok(harness.service.status(user_id).await);
    assert_eq!(status.lifecycle, MfaLifecycle::Enabled);
    assert_eq!(status.backup_codes_remaining, 10);
}

#[tokio::test]
async fn verify_setup_without_pending_secret_is_invalid_state() {
    let harness = harness();

    let result = harness.service.verify_setup(UserId::new(), VALID_CODE).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn verify_setup_with_wrong_code_is_invalid_code() {
    let harness = harness();
    let user_id = UserId::new();

    let _ = expect_ok(harness.service.initiate_setup(user_id).await);

    let result = harness.service.verify_setup(user_id, "000000").await;
    assert!(matches!(result, Err(AppError::InvalidCode)));

    let status = expect_ok(harness.service.status(user_id).await);
    assert_eq!(status.lifecycle, MfaLifecycle::PendingVerification);
}

#[tokio::test]
async fn initiate_setup_again_replaces_the_pending_secret() {
    let harness = harness();
    let user_id = UserId::new();

    let first = expect_ok(harness.service.initiate_setup(user_id).await);
    let second = expect_ok(harness.service.initiate_setup(user_id).await);
    assert_eq!(first.secret_base32, second.secret_base32); // stub provider is fixed

    let backup_codes = expect_ok(harness.service.verify_setup(user_id, VALID_CODE).await);
    assert_eq!(backup_codes.len(), 10);
}

#[tokio::test]
async fn re_enrollment_of_enabled_account_returns_to_pending() {
    let harness = harness();
    let user_id = UserId::new();

    let _ = enroll(&harness, user_id).await;
    let _ = expect_ok(harness.service.initiate_setup(user_id).await);

    let status = expect_ok(harness.service.status(user_id).await);
    assert_eq!(status.lifecycle, MfaLifecycle::PendingVerification);
    assert_eq!(status.backup_codes_remaining, 0);
}

// ---------------------------------------------------------------------------
// Login verification and lockout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verify_login_before_enrollment_is_invalid_state() {
    let harness = harness();

    let result = harness
        .service
        .verify_login(UserId::new(), &subject("login:s1"), VALID_CODE)
        .await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn valid_login_code_yields_totp_verified_signal() {
    let harness = harness();
    let user_id = UserId::new();
    let _ = enroll(&harness, user_id).await;

    let signal = expect_ok(
        harness
            .service
            .verify_login(user_id, &subject("login:s2"), VALID_CODE)
            .await,
    );
    assert_eq!(signal.user_id, user_id);
    assert_eq!(signal.second_factor, SecondFactor::Totp);
}

#[tokio::test]
async fn five_wrong_codes_lock_and_a_correct_code_stays_locked() {
    let harness = harness();
    let user_id = UserId::new();
    let _ = enroll(&harness, user_id).await;
    let key = subject("login:burst");

    for _ in 0..4 {
        let result = harness.service.verify_login(user_id, &key, "000000").await;
        assert!(matches!(result, Err(AppError::InvalidCode)));
    }

    // The locking failure itself reports the cooldown.
    let result = harness.service.verify_login(user_id, &key, "000000").await;
    assert!(matches!(
        result,
        Err(AppError::Locked(remaining)) if remaining > 0 && remaining <= 300
    ));

    // Locked means locked, even with the right code.
    let result = harness.service.verify_login(user_id, &key, VALID_CODE).await;
    assert!(matches!(result, Err(AppError::Locked(_))));
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() {
    let harness = harness();
    let user_id = UserId::new();
    let _ = enroll(&harness, user_id).await;
    let key = subject("login:reset");

    for _ in 0..2 {
        let result = harness.service.verify_login(user_id, &key, "000000").await;
        assert!(matches!(result, Err(AppError::InvalidCode)));
    }

    let signal = harness.service.verify_login(user_id, &key, VALID_CODE).await;
    assert!(signal.is_ok());

    let counter = expect_ok(harness.attempt_store.find(&key).await);
    assert!(counter.is_none());
}

#[tokio::test]
async fn replayed_code_within_the_same_step_is_rejected() {
    let harness = harness();
    let user_id = UserId::new();
    let _ = enroll(&harness, user_id).await;
    let key = subject("login:replay");

    let first = harness.service.verify_login(user_id, &key, VALID_CODE).await;
    assert!(first.is_ok());

    let second = harness.service.verify_login(user_id, &key, VALID_CODE).await;
    assert!(matches!(second, Err(AppError::InvalidCode)));
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backup_code_recovers_exactly_once() {
    let harness = harness();
    let user_id = UserId::new();
    let backup_codes = enroll(&harness, user_id).await;
    let key = subject("login:recovery");

    let code = backup_codes[7].as_str();

    let signal = expect_ok(harness.service.recover(user_id, &key, code).await);
    assert_eq!(signal.second_factor, SecondFactor::BackupCode);

    let status = expect_ok(harness.service.status(user_id).await);
    assert_eq!(status.backup_codes_remaining, 9);

    // Second spend of the same code fails and does not change the count.
    let replay = harness.service.recover(user_id, &key, code).await;
    assert!(matches!(replay, Err(AppError::InvalidCode)));

    let status = expect_ok(harness.service.status(user_id).await);
    assert_eq!(status.backup_codes_remaining, 9);
}

#[tokio::test]
async fn unknown_recovery_code_is_invalid_code() {
    let harness = harness();
    let user_id = UserId::new();
    let _ = enroll(&harness, user_id).await;
    let key = subject("login:bad-recovery");

    let result = harness.service.recover(user_id, &key, "99999999").await;
    assert!(matches!(result, Err(AppError::InvalidCode)));

    let counter = expect_ok(harness.attempt_store.find(&key).await);
    assert!(counter.is_some_and(|counter| counter.failure_count == 1));
}

// ---------------------------------------------------------------------------
// Management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn regenerate_invalidates_the_prior_batch() {
    let harness = harness();
    let user_id = UserId::new();
    let old_codes = enroll(&harness, user_id).await;

    let new_codes = expect_ok(harness.service.regenerate_backup_codes(user_id).await);
    assert_eq!(new_codes.len(), 10);

    let result = harness
        .service
        .recover(user_id, &subject("login:stale"), old_codes[0].as_str())
        .await;
    assert!(matches!(result, Err(AppError::InvalidCode)));
}

#[tokio::test]
async fn regenerate_requires_enabled_state() {
    let harness = harness();
    let user_id = UserId::new();

    let result = harness.service.regenerate_backup_codes(user_id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));

    let _ = expect_ok(harness.service.initiate_setup(user_id).await);
    let result = harness.service.regenerate_backup_codes(user_id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn disable_clears_state_and_is_idempotent() {
    let harness = harness();
    let user_id = UserId::new();
    let _ = enroll(&harness, user_id).await;

    assert!(harness.service.disable(user_id).await.is_ok());

    let status = expect_ok(harness.service.status(user_id).await);
    assert_eq!(status.lifecycle, MfaLifecycle::NotEnrolled);
    assert_eq!(status.backup_codes_remaining, 0);

    // Disabling again is a silent ack.
    assert!(harness.service.disable(user_id).await.is_ok());
}
