//! TOTP provider implementation using the `totp-rs` crate.

use async_trait::async_trait;
use stepauth_application::TotpProvider;
use stepauth_core::{AppError, AppResult};
use totp_rs::{Algorithm, Secret, TOTP};

/// Codes are 6 digits over 30-second steps, RFC 6238 defaults.
const DIGITS: usize = 6;
const STEP_SECONDS: i64 = 30;

/// TOTP provider with RFC 6238 compliance.
///
/// Matching is done step by step rather than through the crate's
/// current-time check so that the accepted step can be reported back for
/// replay tracking, and so verification is pure in the supplied time.
#[derive(Clone)]
pub struct TotpRsProvider {
    issuer: String,
    skew: i64,
}

impl TotpRsProvider {
    /// Creates a provider with the default +/-1 step drift tolerance.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self::with_skew(issuer, 1)
    }

    /// Creates a provider accepting `skew` steps on either side of the
    /// current one.
    #[must_use]
    pub fn with_skew(issuer: impl Into<String>, skew: i64) -> Self {
        Self {
            issuer: issuer.into(),
            skew: skew.max(0),
        }
    }

    fn totp_for(&self, secret_bytes: &[u8], account: &str) -> AppResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            1,
            STEP_SECONDS as u64,
            secret_bytes.to_vec(),
            Some(self.issuer.clone()),
            account.to_owned(),
        )
        .map_err(|error| AppError::Internal(format!("failed to create TOTP instance: {error}")))
    }
}

#[async_trait]
impl TotpProvider for TotpRsProvider {
    fn generate_secret(&self, account: &str) -> AppResult<(Vec<u8>, String, String)> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret.to_bytes().map_err(|error| {
            AppError::Internal(format!("failed to generate TOTP secret: {error}"))
        })?;

        let totp = self.totp_for(&secret_bytes, account)?;

        let base32 = secret.to_encoded().to_string();
        let otpauth_uri = totp.get_url();

        Ok((secret_bytes, base32, otpauth_uri))
    }

    fn matching_step(
        &self,
        secret_bytes: &[u8],
        candidate: &str,
        unix_time: i64,
    ) -> AppResult<Option<i64>> {
        // Malformed candidates are verification failures, not errors.
        if unix_time < 0
            || candidate.len() != DIGITS
            || !candidate.bytes().all(|byte| byte.is_ascii_digit())
        {
            return Ok(None);
        }

        let totp = self.totp_for(secret_bytes, "")?;
        let current_step = unix_time / STEP_SECONDS;

        for offset in -self.skew..=self.skew {
            let step = current_step + offset;
            if step < 0 {
                continue;
            }

            // Exact-string comparison on the zero-padded form.
            let code = totp.generate((step * STEP_SECONDS) as u64);
            if code == candidate {
                return Ok(Some(step));
            }
        }

        Ok(None)
    }

    fn code_at(&self, secret_bytes: &[u8], unix_time: i64) -> AppResult<String> {
        let time = u64::try_from(unix_time).map_err(|_| {
            AppError::Validation("unix time must not be negative".to_owned())
        })?;

        let totp = self.totp_for(secret_bytes, "")?;
        Ok(totp.generate(time))
    }
}

#[cfg(test)]
mod tests {
    use stepauth_application::TotpProvider;

    use super::TotpRsProvider;

    // RFC 4226 / RFC 6238 reference secret.
    const SECRET: &[u8] = b"12345678901234567890";

    fn provider() -> TotpRsProvider {
        TotpRsProvider::new("Stepauth")
    }

    #[test]
    fn matches_the_rfc_6238_reference_vector() {
        // At T = 59 the 8-digit reference value is 94287082; the 6-digit
        // code is its low-order truncation.
        let code = provider().code_at(SECRET, 59);
        assert_eq!(code.ok().as_deref(), Some("287082"));
    }

    #[test]
    fn codes_are_six_zero_padded_digits() {
        let provider = provider();
        for time in [0, 59, 1_111_111_109, 2_000_000_000] {
            let Ok(code) = provider.code_at(SECRET, time) else {
                panic!("code generation failed at {time}");
            };
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|byte| byte.is_ascii_digit()));
        }
    }

    #[test]
    fn current_code_verifies_against_its_own_time() {
        let provider = provider();
        let time = 1_700_000_000;

        let Ok(code) = provider.code_at(SECRET, time) else {
            panic!("code generation failed");
        };

        let step = provider.matching_step(SECRET, &code, time);
        assert_eq!(step.ok().flatten(), Some(time / 30));
    }

    #[test]
    fn drift_window_accepts_adjacent_steps_only() {
        let provider = provider();
        let time = 1_700_000_000;

        let Ok(code) = provider.code_at(SECRET, time) else {
            panic!("code generation failed");
        };

        // Within the 90-second acceptance window.
        assert!(matches!(
            provider.matching_step(SECRET, &code, time + 29),
            Ok(Some(_))
        ));
        assert!(matches!(
            provider.matching_step(SECRET, &code, time - 29),
            Ok(Some(_))
        ));

        // Two or more steps away.
        assert!(matches!(
            provider.matching_step(SECRET, &code, time + 61),
            Ok(None)
        ));
        assert!(matches!(
            provider.matching_step(SECRET, &code, time - 61),
            Ok(None)
        ));
    }

    #[test]
    fn malformed_candidates_fail_without_error() {
        let provider = provider();
        let time = 1_700_000_000;

        for candidate in ["", "12345", "1234567", "12a456", "12 456", "١٢٣٤٥٦"] {
            let result = provider.matching_step(SECRET, candidate, time);
            assert!(matches!(result, Ok(None)), "candidate {candidate:?}");
        }
    }

    #[test]
    fn provisioning_uri_embeds_issuer_and_account() {
        let result = provider().generate_secret("42");
        let Ok((secret_bytes, base32, uri)) = result else {
            panic!("secret generation failed");
        };

        // 160 bits of entropy minimum.
        assert!(secret_bytes.len() >= 20);
        assert!(!base32.is_empty());
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("issuer=Stepauth"));
        assert!(uri.contains(&base32));
    }
}
