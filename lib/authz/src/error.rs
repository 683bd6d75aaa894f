//! Authorization error types.

use dashgate_core::{ErrorKind, Kind};
use std::fmt;

/// Authorization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Permission denied.
    PermissionDenied {
        /// The user that was checked.
        login: String,
        /// The action that was requested.
        action: String,
        /// The kind of resource targeted.
        kind: Kind,
        /// The project targeted, empty for cluster-wide checks.
        project: String,
    },
    /// The role store failed.
    Store {
        /// Error details.
        details: String,
    },
    /// Invalid action or scope name.
    InvalidInput {
        /// Error details.
        details: String,
    },
}

impl AuthzError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::Unauthorized,
            Self::InvalidInput { .. } => ErrorKind::BadRequest,
            Self::Store { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied {
                login,
                action,
                kind,
                project,
            } => {
                if project.is_empty() {
                    write!(f, "user '{}' may not {} {}", login, action, kind)
                } else {
                    write!(
                        f,
                        "user '{}' may not {} {} in project '{}'",
                        login, action, kind, project
                    )
                }
            }
            Self::Store { details } => {
                write!(f, "role store error: {}", details)
            }
            Self::InvalidInput { details } => {
                write!(f, "invalid authorization input: {}", details)
            }
        }
    }
}

impl std::error::Error for AuthzError {}
