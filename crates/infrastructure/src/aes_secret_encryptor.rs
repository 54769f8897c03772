//! AES-256-GCM encryption of MFA secrets at rest.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use stepauth_application::SecretEncryptor;
use stepauth_core::{AppError, AppResult};

const NONCE_LEN: usize = 12;

/// AES-256-GCM encryptor protecting TOTP secrets in the database.
///
/// Each stored value is a fresh random nonce followed by the sealed
/// secret, so a single key covers any number of accounts.
#[derive(Clone)]
pub struct AesSecretEncryptor {
    cipher: Aes256Gcm,
}

impl AesSecretEncryptor {
    /// Creates an encryptor from a 32-byte key.
    #[must_use]
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes)),
        }
    }

    /// Creates an encryptor from the hex-encoded key supplied through
    /// `MFA_ENCRYPTION_KEY`.
    pub fn from_hex(hex_key: &str) -> AppResult<Self> {
        let key_bytes: [u8; 32] = hex::decode(hex_key)
            .map_err(|error| {
                AppError::Validation(format!("invalid MFA_ENCRYPTION_KEY hex: {error}"))
            })?
            .try_into()
            .map_err(|_| {
                AppError::Validation(
                    "MFA_ENCRYPTION_KEY must decode to exactly 32 bytes (64 hex chars)".to_owned(),
                )
            })?;

        Ok(Self::new(&key_bytes))
    }
}

#[async_trait]
impl SecretEncryptor for AesSecretEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|error| AppError::Internal(format!("failed to encrypt secret: {error}")))?;

        let mut stored = Vec::with_capacity(NONCE_LEN + sealed.len());
        stored.extend_from_slice(&nonce);
        stored.extend_from_slice(&sealed);
        Ok(stored)
    }

    fn decrypt(&self, stored: &[u8]) -> AppResult<Vec<u8>> {
        if stored.len() <= NONCE_LEN {
            return Err(AppError::Internal(
                "stored secret is shorter than its nonce".to_owned(),
            ));
        }

        let (nonce, sealed) = stored.split_at(NONCE_LEN);

        // Authentication failure and truncation both land here; the caller
        // only ever sees an opaque internal error.
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AppError::Internal("failed to decrypt stored secret".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use stepauth_application::SecretEncryptor;

    use super::AesSecretEncryptor;
    use stepauth_core::AppResult;

    #[test]
    fn encrypt_decrypt_roundtrip() -> AppResult<()> {
        let encryptor = AesSecretEncryptor::new(&[7u8; 32]);

        let plaintext = b"a-totp-shared-secret";
        let stored = encryptor.encrypt(plaintext)?;
        assert_eq!(encryptor.decrypt(&stored)?, plaintext);
        Ok(())
    }

    #[test]
    fn nonces_differ_between_encryptions() -> AppResult<()> {
        let encryptor = AesSecretEncryptor::new(&[7u8; 32]);

        let first = encryptor.encrypt(b"same-secret")?;
        let second = encryptor.encrypt(b"same-secret")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn decrypt_with_wrong_key_fails() -> AppResult<()> {
        let sealing = AesSecretEncryptor::new(&[1u8; 32]);
        let opening = AesSecretEncryptor::new(&[2u8; 32]);

        let stored = sealing.encrypt(b"secret")?;
        assert!(opening.decrypt(&stored).is_err());
        Ok(())
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() -> AppResult<()> {
        let encryptor = AesSecretEncryptor::new(&[7u8; 32]);

        let mut stored = encryptor.encrypt(b"secret")?;
        if let Some(last) = stored.last_mut() {
            *last ^= 0x01;
        }
        assert!(encryptor.decrypt(&stored).is_err());
        Ok(())
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let encryptor = AesSecretEncryptor::new(&[7u8; 32]);
        assert!(encryptor.decrypt(&[0u8; 11]).is_err());
    }

    #[test]
    fn from_hex_rejects_short_keys() {
        assert!(AesSecretEncryptor::from_hex("deadbeef").is_err());
    }
}
