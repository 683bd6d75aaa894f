//! Error handling foundation for dashgate.
//!
//! This module provides the `Result` type alias using rootcause, plus the
//! small taxonomy every crate maps its own errors onto. The server turns an
//! [`ErrorKind`] into an HTTP status; nothing else in the workspace cares
//! about transport.

use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Coarse classification of a failure, shared across crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, wrong credentials, unknown provider.
    BadRequest,
    /// Missing, invalid or expired token, or a failed permission check.
    Unauthorized,
    /// The addressed entity does not exist.
    NotFound,
    /// The write would collide with existing state.
    Conflict,
    /// Anything the caller cannot fix.
    Internal,
}

impl ErrorKind {
    /// Returns the numeric HTTP status associated with this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}
