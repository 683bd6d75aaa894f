//! Error types for the identity crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `TokenError`: token signing, verification and rotation
//! - `StoreError`: user store and refresh-token ledger failures
//! - `SyncError`: external identity synchronization refusals
//! - `LoginError`: native credential checks
//! - `UserInfoError`: provider user-info that cannot yield an identity
//!
//! Every error reports an [`ErrorKind`] so the web layer can pick a status
//! without matching on variants it does not own.

use dashgate_core::ErrorKind;
use std::fmt;

/// Errors from the token service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is malformed, forged, expired or already rotated.
    ///
    /// Deliberately carries no reason: callers must not learn why a token
    /// was refused.
    Unauthorized,
    /// Signing a fresh token failed.
    Signing { details: String },
    /// The refresh-token ledger could not be consulted.
    Ledger { details: String },
}

impl TokenError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Signing { .. } | Self::Ledger { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Signing { details } => write!(f, "failed to sign token: {details}"),
            Self::Ledger { details } => write!(f, "refresh token ledger error: {details}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Errors from the user store and the refresh-token ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No entity with that name.
    NotFound { name: String },
    /// An entity with that name already exists.
    AlreadyExists { name: String },
    /// The record changed since it was read.
    Stale { name: String },
    /// The backing storage failed.
    Backend { details: String },
}

impl StoreError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } | Self::Stale { .. } => ErrorKind::Conflict,
            Self::Backend { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "'{name}' not found"),
            Self::AlreadyExists { name } => write!(f, "'{name}' already exists"),
            Self::Stale { name } => write!(f, "'{name}' was modified concurrently"),
            Self::Backend { details } => write!(f, "storage error: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Reasons an external identity cannot be merged into a local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The provider did not yield a login.
    EmptyLogin,
    /// The login belongs to a password-protected native account.
    NativeAccount { login: String },
    /// The login is already bound to another external provider.
    ProviderConflict {
        login: String,
        bound_issuer: String,
        incoming_issuer: String,
    },
    /// Reading or writing the user failed.
    Store { details: String },
}

impl SyncError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyLogin => ErrorKind::BadRequest,
            Self::NativeAccount { .. } | Self::ProviderConflict { .. } => ErrorKind::Conflict,
            Self::Store { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyLogin => write!(f, "external identity has an empty login"),
            Self::NativeAccount { login } => {
                write!(f, "user '{login}' is a native account and cannot be federated")
            }
            Self::ProviderConflict {
                login,
                bound_issuer,
                incoming_issuer,
            } => write!(
                f,
                "user '{login}' is bound to '{bound_issuer}', refusing '{incoming_issuer}'"
            ),
            Self::Store { details } => write!(f, "user sync storage error: {details}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Errors from native login and sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// Login or password is empty.
    MissingCredentials,
    /// Unknown login or wrong password; the two are indistinguishable.
    WrongCredentials,
    /// The password could not be hashed.
    Hashing { details: String },
    /// The user store failed.
    Store { details: String },
    /// Sign-up for a login that is already taken.
    AlreadyExists { login: String },
}

impl LoginError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredentials | Self::WrongCredentials => ErrorKind::BadRequest,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::Hashing { .. } | Self::Store { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredentials => write!(f, "login and password are required"),
            Self::WrongCredentials => write!(f, "wrong login or password"),
            Self::Hashing { details } => write!(f, "failed to hash password: {details}"),
            Self::Store { details } => write!(f, "user storage error: {details}"),
            Self::AlreadyExists { login } => write!(f, "user '{login}' already exists"),
        }
    }
}

impl std::error::Error for LoginError {}

/// Errors turning a provider's user-info payload into an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInfoError {
    /// None of the configured properties carried a login.
    MissingLogin,
    /// The payload is not a JSON object.
    Malformed { details: String },
}

impl UserInfoError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

impl fmt::Display for UserInfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLogin => write!(f, "user info does not contain a usable login"),
            Self::Malformed { details } => write!(f, "malformed user info: {details}"),
        }
    }
}

impl std::error::Error for UserInfoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_unauthorized_display_is_generic() {
        assert_eq!(TokenError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn wrong_credentials_is_a_bad_request() {
        let err = LoginError::WrongCredentials;
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "wrong login or password");
    }

    #[test]
    fn provider_conflict_display_names_both_issuers() {
        let err = SyncError::ProviderConflict {
            login: "alice".to_string(),
            bound_issuer: "github.com".to_string(),
            incoming_issuer: "gitlab.com".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("github.com"));
        assert!(err.to_string().contains("gitlab.com"));
    }

    #[test]
    fn store_errors_classify() {
        assert_eq!(
            StoreError::NotFound {
                name: "bob".to_string()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StoreError::Backend {
                details: "down".to_string()
            }
            .kind(),
            ErrorKind::Internal
        );
    }
}
