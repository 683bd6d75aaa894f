//! HTTP error responses.
//!
//! Every domain error maps onto [`ErrorKind`], which picks the status code.
//! Internal failures are logged and replaced with a generic message; so are
//! authentication failures, whose precise cause must not reach the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashgate_authz::AuthzError;
use dashgate_core::ErrorKind;
use dashgate_identity::{LoginError, StoreError, SyncError, TokenError, UserInfoError};
use rootcause::prelude::Report;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error};

use crate::config::ConfigError;

/// Handshake state errors of the secure state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The state cookie is absent or could not be decrypted.
    Missing { name: &'static str },
    /// The state does not match the value echoed by the provider.
    Mismatch { name: &'static str },
    /// The state was already used once.
    Replayed { name: &'static str },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { name } => write!(f, "missing handshake value '{}'", name),
            Self::Mismatch { name } => write!(f, "handshake value '{}' does not match", name),
            Self::Replayed { name } => write!(f, "handshake value '{}' was already used", name),
        }
    }
}

impl std::error::Error for StateError {}

/// Errors talking to an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// A request parameter is missing.
    MissingParameter { name: &'static str },
    /// The grant type is not handled by the endpoint.
    UnsupportedGrant { grant_type: String },
    /// The flow is not configured for this provider.
    NotConfigured { flow: &'static str },
    /// The provider answered with an OAuth error, relayed to the caller.
    Relay {
        error: String,
        description: Option<String>,
    },
    /// The provider refused the credentials or the code.
    Rejected { details: String },
    /// The provider could not be reached or answered garbage.
    Upstream { details: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParameter { name } => write!(f, "missing parameter '{}'", name),
            Self::UnsupportedGrant { grant_type } => {
                write!(f, "unsupported grant type '{}'", grant_type)
            }
            Self::NotConfigured { flow } => {
                write!(f, "{} flow is not configured for this provider", flow)
            }
            Self::Relay { error, description } => match description {
                Some(description) => write!(f, "{}: {}", error, description),
                None => write!(f, "{}", error),
            },
            Self::Rejected { details } => write!(f, "provider rejected the login: {}", details),
            Self::Upstream { details } => write!(f, "identity provider error: {}", details),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors raised while assembling the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    Config { details: String },
    Provider { name: String, details: String },
    Database { details: String },
    Io { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {}", details),
            Self::Provider { name, details } => {
                write!(f, "failed to set up provider '{}': {}", name, details)
            }
            Self::Database { details } => write!(f, "database error: {}", details),
            Self::Io { details } => write!(f, "io error: {}", details),
        }
    }
}

impl std::error::Error for StartupError {}

impl StartupError {
    /// Wraps a configuration failure.
    #[must_use]
    pub fn config(report: Report<ConfigError>) -> Self {
        Self::Config {
            details: report.current_context().to_string(),
        }
    }
}

/// Maps a domain error onto the HTTP taxonomy.
pub trait Classify: fmt::Display {
    fn kind(&self) -> ErrorKind;

    /// Message shown to the caller.
    fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal server error".to_string(),
            ErrorKind::Unauthorized => "unauthorized".to_string(),
            _ => self.to_string(),
        }
    }

    /// OAuth error to relay verbatim, if any.
    fn relay(&self) -> Option<(String, Option<String>)> {
        None
    }
}

macro_rules! classify_by_kind {
    ($($error:ty),* $(,)?) => {
        $(
            impl Classify for $error {
                fn kind(&self) -> ErrorKind {
                    <$error>::kind(self)
                }
            }
        )*
    };
}

classify_by_kind!(TokenError, LoginError, SyncError, UserInfoError, StoreError);

impl Classify for AuthzError {
    fn kind(&self) -> ErrorKind {
        AuthzError::kind(self)
    }

    fn public_message(&self) -> String {
        match self {
            Self::PermissionDenied { .. } => self.to_string(),
            Self::InvalidInput { .. } => self.to_string(),
            Self::Store { .. } => "internal server error".to_string(),
        }
    }
}

impl Classify for StateError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Unauthorized
    }
}

impl Classify for ProviderError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter { .. }
            | Self::UnsupportedGrant { .. }
            | Self::NotConfigured { .. }
            | Self::Relay { .. } => ErrorKind::BadRequest,
            Self::Rejected { .. } => ErrorKind::Unauthorized,
            Self::Upstream { .. } => ErrorKind::Internal,
        }
    }

    fn relay(&self) -> Option<(String, Option<String>)> {
        match self {
            Self::Relay { error, description } => Some((error.clone(), description.clone())),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct MessageBody {
    message: String,
}

#[derive(Serialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

/// Error returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// `{"message": ...}` with the status of `kind`.
    Message { kind: ErrorKind, message: String },
    /// `{"error": ..., "error_description": ...}` with status 400.
    OAuth {
        error: String,
        error_description: Option<String>,
    },
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Message {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "unauthorized")
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Logs `details` and returns a generic internal error.
    #[must_use]
    pub fn internal(details: impl fmt::Display) -> Self {
        error!(error = %details, "internal error");
        Self::new(ErrorKind::Internal, "internal server error")
    }

    /// Converts a bare domain error.
    #[must_use]
    pub fn from_error<C: Classify>(error: C) -> Self {
        Self::classify(&error)
    }

    fn classify<C: Classify + ?Sized>(context: &C) -> Self {
        if let Some((error, error_description)) = context.relay() {
            return Self::OAuth {
                error,
                error_description,
            };
        }
        let kind = context.kind();
        match kind {
            ErrorKind::Internal => error!(error = %context, "internal error"),
            ErrorKind::Unauthorized => debug!(error = %context, "unauthorized"),
            _ => debug!(error = %context, "request rejected"),
        }
        Self::new(kind, context.public_message())
    }

    /// The status code of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Message { kind, .. } => StatusCode::from_u16(kind.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::OAuth { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl<C: Classify + Send + Sync + 'static> From<Report<C>> for ApiError {
    fn from(report: Report<C>) -> Self {
        Self::classify(report.current_context())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Message { message, .. } => (status, Json(MessageBody { message })).into_response(),
            Self::OAuth {
                error,
                error_description,
            } => (
                status,
                Json(OAuthErrorBody {
                    error,
                    error_description,
                }),
            )
                .into_response(),
        }
    }
}
