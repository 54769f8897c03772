//! Single-use backup code lifecycle.
//!
//! Codes are 8-digit fixed-width numbers from a cryptographically secure
//! source, returned to the caller exactly once and persisted only as
//! SHA-256 hashes.

use std::collections::HashSet;
use std::sync::Arc;

use stepauth_core::{AppError, AppResult};
use stepauth_domain::UserId;

use crate::mfa_service::SecretStore;

/// Number of backup codes in a batch unless configured otherwise.
pub const DEFAULT_BACKUP_CODE_COUNT: usize = 10;

// 8 decimal digits, leading zeros preserved.
const CODE_MODULUS: u32 = 100_000_000;

/// Application service owning backup code generation and consumption.
#[derive(Clone)]
pub struct BackupCodeManager {
    store: Arc<dyn SecretStore>,
    code_count: usize,
}

impl BackupCodeManager {
    /// Creates a manager producing batches of `code_count` codes.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>, code_count: usize) -> Self {
        Self { store, code_count }
    }

    /// Generates a fresh batch, replacing any existing codes.
    ///
    /// The returned plaintext codes are the only copy; callers must show
    /// them to the user immediately and must not log them.
    pub async fn generate(&self, user_id: UserId) -> AppResult<Vec<String>> {
        let codes = generate_codes(self.code_count)?;
        let hashes: Vec<String> = codes.iter().map(|code| hash_backup_code(code)).collect();

        self.store.replace_backup_codes(user_id, &hashes).await?;

        Ok(codes)
    }

    /// Invalidates all existing codes and issues a new batch.
    pub async fn regenerate(&self, user_id: UserId) -> AppResult<Vec<String>> {
        // Replacement deletes the prior batch in the same transaction.
        self.generate(user_id).await
    }

    /// Consumes the candidate code if it matches an unused stored hash.
    ///
    /// The used-mark is atomic in the store, so two concurrent calls with
    /// the same valid code yield exactly one `true`.
    pub async fn consume(&self, user_id: UserId, candidate: &str) -> AppResult<bool> {
        let code_hash = hash_backup_code(candidate);
        self.store.consume_backup_code(user_id, &code_hash).await
    }

    /// Number of unused codes left for the user.
    pub async fn remaining(&self, user_id: UserId) -> AppResult<i64> {
        self.store.unused_backup_code_count(user_id).await
    }
}

/// Generates `count` distinct 8-digit codes, zero-padded to fixed width.
fn generate_codes(count: usize) -> AppResult<Vec<String>> {
    let mut codes: HashSet<String> = HashSet::with_capacity(count);

    while codes.len() < count {
        let mut bytes = [0u8; 4];
        getrandom::fill(&mut bytes).map_err(|error| {
            AppError::Internal(format!("failed to gather randomness: {error}"))
        })?;

        let value = u32::from_be_bytes(bytes) % CODE_MODULUS;
        codes.insert(format!("{value:08}"));
    }

    Ok(codes.into_iter().collect())
}

/// Hashes a single backup code with SHA-256 for storage and lookup.
pub(crate) fn hash_backup_code(code: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write;

    let normalized = code.trim();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let result = hasher.finalize();

    result
        .iter()
        .fold(String::with_capacity(64), |mut acc, byte| {
            let _ = write!(acc, "{byte:02x}");
            acc
        })
}
