//! Secret hashing and verification using Argon2id.
//!
//! Only the PHC string (algorithm, parameters, salt, hash) is kept.

use crate::primitives::MIN_SECRET_LENGTH;
use crate::{Credentials, LineageError, Person};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

impl Credentials {
    /// Hash a plaintext secret with a fresh salt.
    pub fn from_secret(secret: &str) -> Result<Self, LineageError> {
        if secret.chars().count() < MIN_SECRET_LENGTH {
            return Err(LineageError::InputValidation(format!(
                "secret must be at least {} characters",
                MIN_SECRET_LENGTH
            )));
        }
        let salt = SaltString::generate(&mut OsRng);
        let secret_hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| LineageError::InputValidation(format!("failed to hash secret: {e}")))?;
        Ok(Self { secret_hash })
    }

    /// Wrap an existing PHC hash string after checking its format.
    pub fn from_phc(hash: impl Into<String>) -> Result<Self, LineageError> {
        let secret_hash = hash.into();
        PasswordHash::new(&secret_hash).map_err(|e| {
            LineageError::InputValidation(format!("invalid secret hash format: {e}"))
        })?;
        Ok(Self { secret_hash })
    }

    /// Whether `secret` matches.
    pub fn verify(&self, secret: &str) -> Result<bool, LineageError> {
        let parsed = PasswordHash::new(&self.secret_hash).map_err(|e| {
            LineageError::Serialization(format!("stored secret hash unreadable: {e}"))
        })?;
        Ok(Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok())
    }

    /// The PHC string.
    #[must_use]
    pub fn phc(&self) -> &str {
        &self.secret_hash
    }
}

/// Issued on successful authentication of a Living person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: Uuid,
    pub person: Person,
    pub issued_at: DateTime<Utc>,
}

impl AuthSession {
    pub(crate) fn issue(person: Person) -> Self {
        Self {
            token: Uuid::new_v4(),
            person,
            issued_at: Utc::now(),
        }
    }
}
