//! Normalization of provider user-info into an [`ExternalIdentity`].
//!
//! Providers disagree on where the login lives, so parsing is a strategy
//! chosen per configured provider instead of one fixed payload shape.

use crate::error::UserInfoError;
use crate::user::ProviderBinding;
use serde_json::{Map, Value};

/// Properties tried, in order, when an OAuth provider has no custom one.
pub const DEFAULT_OAUTH_LOGIN_PROPERTIES: [&str; 2] = ["login", "username"];

/// Identity asserted by an external provider, ready for user sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub login: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `None` when the provider leaves no binding behind (Kubernetes).
    pub provider: Option<ProviderBinding>,
}

impl ExternalIdentity {
    /// Creates an identity with a login only.
    #[must_use]
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            first_name: None,
            last_name: None,
            provider: None,
        }
    }

    /// Attaches the provider binding.
    #[must_use]
    pub fn with_provider(mut self, binding: ProviderBinding) -> Self {
        self.provider = Some(binding);
        self
    }
}

/// Turns a user-info document into an identity.
pub trait UserInfoStrategy: Send + Sync {
    /// Builds the identity.
    ///
    /// # Errors
    ///
    /// Returns `UserInfoError` if no login can be derived.
    fn identity(&self, user_info: &Value) -> Result<ExternalIdentity, UserInfoError>;
}

/// Login from the part of an email address before `@`.
#[must_use]
pub fn login_from_email(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(local, _)| local)
        .filter(|local| !local.is_empty())
        .map(str::to_string)
}

/// User-info of a plain OAuth 2.0 provider.
///
/// The login is the first present property of `login_properties`, falling
/// back to the email's local part. OAuth has no issuer, so the caller
/// supplies one (the authorization host) and the login doubles as subject.
#[derive(Debug, Clone)]
pub struct OAuthUserInfo {
    issuer: String,
    login_properties: Vec<String>,
}

impl OAuthUserInfo {
    /// Creates the strategy; `custom_login_property` replaces the defaults.
    #[must_use]
    pub fn new(issuer: impl Into<String>, custom_login_property: Option<&str>) -> Self {
        let login_properties = match custom_login_property.filter(|p| !p.is_empty()) {
            Some(property) => vec![property.to_string()],
            None => DEFAULT_OAUTH_LOGIN_PROPERTIES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        };
        Self {
            issuer: issuer.into(),
            login_properties,
        }
    }
}

impl UserInfoStrategy for OAuthUserInfo {
    fn identity(&self, user_info: &Value) -> Result<ExternalIdentity, UserInfoError> {
        let object = as_object(user_info)?;
        let email = string_property(object, "email");
        let login = self
            .login_properties
            .iter()
            .find_map(|key| string_property(object, key))
            .or_else(|| email.as_deref().and_then(login_from_email))
            .ok_or(UserInfoError::MissingLogin)?;

        let binding = ProviderBinding::new(&self.issuer, &login).with_email(email);
        Ok(ExternalIdentity {
            first_name: first_name(object),
            last_name: last_name(object),
            ..ExternalIdentity::new(login).with_provider(binding)
        })
    }
}

/// Claims of an OIDC provider (verified ID token merged with user-info).
///
/// The login is the first present claim of `login_claims`, where `email`
/// contributes its local part. Without configured claims the subject is
/// the login.
#[derive(Debug, Clone)]
pub struct OidcUserInfo {
    issuer: String,
    login_claims: Vec<String>,
}

impl OidcUserInfo {
    /// Creates the strategy.
    #[must_use]
    pub fn new(issuer: impl Into<String>, login_claims: Vec<String>) -> Self {
        Self {
            issuer: issuer.into(),
            login_claims,
        }
    }
}

impl UserInfoStrategy for OidcUserInfo {
    fn identity(&self, user_info: &Value) -> Result<ExternalIdentity, UserInfoError> {
        let object = as_object(user_info)?;
        let subject = string_property(object, "sub").ok_or(UserInfoError::MissingLogin)?;
        let email = string_property(object, "email");

        let login = self
            .login_claims
            .iter()
            .find_map(|claim| {
                let value = string_property(object, claim)?;
                if claim == "email" {
                    login_from_email(&value)
                } else {
                    Some(value)
                }
            })
            .unwrap_or_else(|| subject.clone());

        let binding = ProviderBinding::new(&self.issuer, subject).with_email(email);
        Ok(ExternalIdentity {
            first_name: first_name(object),
            last_name: last_name(object),
            ..ExternalIdentity::new(login).with_provider(binding)
        })
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, UserInfoError> {
    value.as_object().ok_or_else(|| UserInfoError::Malformed {
        details: "expected a JSON object".to_string(),
    })
}

/// Reads a property as a non-empty string; numbers are stringified.
fn string_property(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_name(object: &Map<String, Value>) -> Option<String> {
    string_property(object, "given_name").or_else(|| string_property(object, "first_name"))
}

fn last_name(object: &Map<String, Value>) -> Option<String> {
    string_property(object, "family_name").or_else(|| string_property(object, "last_name"))
}
