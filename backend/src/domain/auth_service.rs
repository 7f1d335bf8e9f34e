//! Registration, verification, and login over the sharded user store.

use std::fmt::Write as _;
use std::sync::Arc;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::domain::ports::UserStore;
use crate::domain::{DataError, NewUser, User};

/// Failures surfaced by the auth flows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Another account already owns this email.
    #[error("email already registered")]
    EmailTaken,

    /// The verification code does not match the stored one.
    #[error("invalid verification code")]
    InvalidCode,

    /// Unknown email or wrong password; deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but has not completed verification.
    #[error("account not verified")]
    NotVerified,

    /// Malformed registration input.
    #[error("invalid registration: {0}")]
    InvalidInput(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] DataError),
}

/// Account lifecycle service.
///
/// Token shape is an external collaborator concern; login returns the
/// user's decimal ID as an opaque token. Code delivery (email) happens
/// outside this service, so `register` hands the code back to the caller.
pub struct AuthService {
    users: Arc<dyn UserStore>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Register a new account and return its 4-digit verification code.
    pub async fn register(&self, email: &str, password: &str) -> Result<String, AuthError> {
        if self.users.find_by_email(email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let code = format!("{:04}", rand::thread_rng().gen_range(0..10_000));
        let new_user = NewUser::try_new(email, digest_password(password), &code)
            .map_err(|err| AuthError::InvalidInput(err.to_string()))?;

        match self.users.create(new_user).await {
            Ok(user) => {
                info!(user_id = user.id, "user registered");
                Ok(code)
            }
            // Two registrations raced on the email index; the loser sees
            // the same outcome as the pre-check.
            Err(err) if err.is_conflict() => Err(AuthError::EmailTaken),
            Err(err) => Err(err.into()),
        }
    }

    /// Confirm the verification code delivered out of band.
    pub async fn verify(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if user.verification_code != code {
            return Err(AuthError::InvalidCode);
        }

        self.users.set_verified(email, true).await?;
        Ok(())
    }

    /// Authenticate and return `(token, user)`.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, User), AuthError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if user.password_hash != digest_password(password) {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_verified {
            return Err(AuthError::NotVerified);
        }

        Ok((user.id.to_string(), user))
    }
}

/// SHA-256 hex digest of the password.
fn digest_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
