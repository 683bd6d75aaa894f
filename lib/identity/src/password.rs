//! Native password hashing with Argon2id.

use crate::error::LoginError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::sync::LazyLock;

/// Hashes a password into a PHC string.
///
/// # Errors
///
/// Returns `LoginError::Hashing` if Argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String, LoginError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LoginError::Hashing {
            details: e.to_string(),
        })
}

/// Hash checked in place of a missing one, so that unknown logins cost as
/// much as wrong passwords.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("dashgate-dummy-password").ok());

/// Runs a full verification that always fails.
pub fn verify_dummy(password: &str) {
    match DUMMY_HASH.as_deref() {
        Some(hash) => {
            verify_password(password, hash);
        }
        None => tracing::warn!("dummy password hash unavailable"),
    }
}

/// Checks a password against a stored PHC string.
///
/// A stored value that does not parse counts as a mismatch.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
