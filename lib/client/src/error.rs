//! Client error types.

use std::fmt;

/// Errors raised while logging in or talking to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A required input was not provided and could not be prompted for.
    MissingInput {
        /// Name of the missing input.
        field: &'static str,
    },
    /// The requested provider is not configured on the server.
    UnknownProvider {
        /// The slug that was requested.
        slug: String,
    },
    /// The request could not be sent or the response could not be read.
    Http {
        /// Error details.
        details: String,
    },
    /// The API answered with an error.
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the response body.
        message: String,
    },
    /// The identity provider answered with an OAuth error.
    Provider {
        /// OAuth error code, e.g. `authorization_pending`.
        error: String,
        /// Optional human readable description.
        description: Option<String>,
    },
    /// The user declined the device authorization.
    AccessDenied,
    /// The device code expired before the user authorized it.
    ExpiredToken,
    /// Reading user input or a local file failed.
    Input {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput { field } => write!(f, "missing {}", field),
            Self::UnknownProvider { slug } => {
                write!(f, "provider '{}' is not configured on the server", slug)
            }
            Self::Http { details } => write!(f, "http error: {}", details),
            Self::Api { status, message } => write!(f, "api error {}: {}", status, message),
            Self::Provider { error, description } => match description {
                Some(description) => write!(f, "provider error {}: {}", error, description),
                None => write!(f, "provider error {}", error),
            },
            Self::AccessDenied => write!(f, "access denied by the user"),
            Self::ExpiredToken => write!(f, "device code expired"),
            Self::Input { details } => write!(f, "input error: {}", details),
        }
    }
}

impl std::error::Error for ClientError {}
