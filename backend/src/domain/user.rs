//! User data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted email length, matching the column width.
pub const MAX_EMAIL_LEN: usize = 255;

/// Validation errors returned by [`NewUser::try_new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    EmptyEmail,
    EmailTooLong,
    MissingAtSign,
    EmptyPasswordHash,
}

impl std::fmt::Display for UserValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyEmail => write!(f, "email must not be empty"),
            Self::EmailTooLong => write!(f, "email must be at most {MAX_EMAIL_LEN} characters"),
            Self::MissingAtSign => write!(f, "email must contain '@'"),
            Self::EmptyPasswordHash => write!(f, "password hash must not be empty"),
        }
    }
}

impl std::error::Error for UserValidationError {}

/// A stored user row.
///
/// ## Invariants
/// - `email` is globally unique across all user shards and discoverable by
///   exactly one email-index row.
/// - `id` is minted once and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub verification_code: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a user; the store mints the ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    email: String,
    password_hash: String,
    verification_code: String,
}

impl NewUser {
    /// Fallible constructor enforcing the email and credential invariants.
    pub fn try_new(
        email: impl Into<String>,
        password_hash: impl Into<String>,
        verification_code: impl Into<String>,
    ) -> Result<Self, UserValidationError> {
        let email = email.into();
        let trimmed = email.trim();
        if trimmed.is_empty() {
            return Err(UserValidationError::EmptyEmail);
        }
        if trimmed.len() > MAX_EMAIL_LEN {
            return Err(UserValidationError::EmailTooLong);
        }
        if !trimmed.contains('@') {
            return Err(UserValidationError::MissingAtSign);
        }

        let password_hash = password_hash.into();
        if password_hash.is_empty() {
            return Err(UserValidationError::EmptyPasswordHash);
        }

        Ok(Self {
            email: trimmed.to_owned(),
            password_hash,
            verification_code: verification_code.into(),
        })
    }

    /// Normalized email address.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Opaque credential digest.
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// One-time verification code delivered out of band.
    pub fn verification_code(&self) -> &str {
        &self.verification_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", UserValidationError::EmptyEmail)]
    #[case("   ", UserValidationError::EmptyEmail)]
    #[case("no-at-sign", UserValidationError::MissingAtSign)]
    fn try_new_rejects_bad_emails(#[case] email: &str, #[case] expected: UserValidationError) {
        let result = NewUser::try_new(email, "digest", "0042");
        assert_eq!(result.expect_err("email should be rejected"), expected);
    }

    #[rstest]
    fn try_new_rejects_overlong_email() {
        let local = "a".repeat(MAX_EMAIL_LEN);
        let result = NewUser::try_new(format!("{local}@x"), "digest", "0042");
        assert_eq!(
            result.expect_err("email should be rejected"),
            UserValidationError::EmailTooLong
        );
    }

    #[rstest]
    fn try_new_rejects_empty_password_hash() {
        let result = NewUser::try_new("a@x", "", "0042");
        assert_eq!(
            result.expect_err("credential should be rejected"),
            UserValidationError::EmptyPasswordHash
        );
    }

    #[rstest]
    fn try_new_trims_whitespace() {
        let user = NewUser::try_new("  a@x  ", "digest", "0042").expect("valid payload");
        assert_eq!(user.email(), "a@x");
    }

    #[rstest]
    fn serialization_omits_credentials() {
        let user = User {
            id: 7,
            email: "a@x".into(),
            password_hash: "digest".into(),
            verification_code: "0042".into(),
            is_verified: true,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&user).expect("serialize user");
        assert!(value.get("password_hash").is_none());
        assert!(value.get("verification_code").is_none());
        assert_eq!(value.get("email").and_then(|v| v.as_str()), Some("a@x"));
    }
}
