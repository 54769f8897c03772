use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// Key under which failed verification attempts are counted.
///
/// During the login flow the user is not yet authenticated, so lockout is
/// keyed by an opaque pre-session key issued by the surrounding system
/// rather than by a client-supplied user identifier. During enrollment the
/// key is derived from the already-authenticated user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey(String);

impl SubjectKey {
    /// Creates a validated subject key.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "subject key must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}
