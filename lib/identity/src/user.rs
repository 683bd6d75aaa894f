//! User domain type and related structures.
//!
//! A user is identified by its login. It holds either a native password
//! credential or bindings to external identity providers, never both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binding between a local user and an account at an external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBinding {
    /// Issuer of the external identity (OIDC issuer or OAuth host).
    pub issuer: String,
    /// Email reported by the provider, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Stable account identifier at the provider.
    pub subject: String,
}

impl ProviderBinding {
    /// Creates a binding without an email.
    #[must_use]
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            email: None,
            subject: subject.into(),
        }
    }

    /// Sets the email reported by the provider.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Whether this binding designates the same external account.
    #[must_use]
    pub fn same_account(&self, other: &ProviderBinding) -> bool {
        self.issuer == other.issuer && self.subject == other.subject
    }
}

/// A local user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    /// Argon2 PHC string of the native password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password_hash: Option<String>,
    #[serde(default)]
    oauth_providers: Vec<ProviderBinding>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    /// Creates an empty user with the given login.
    #[must_use]
    pub fn new(login: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            login: login.into(),
            first_name: None,
            last_name: None,
            password_hash: None,
            oauth_providers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the native password hash.
    #[must_use]
    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    /// Sets first and last name.
    #[must_use]
    pub fn with_name(mut self, first_name: Option<String>, last_name: Option<String>) -> Self {
        self.first_name = first_name.filter(|n| !n.is_empty());
        self.last_name = last_name.filter(|n| !n.is_empty());
        self
    }

    /// Returns the login.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the first name, if set.
    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    /// Returns the last name, if set.
    #[must_use]
    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// Returns the native password hash, if the user has one.
    #[must_use]
    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    /// Whether the user authenticates with a native password.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Returns the external provider bindings.
    #[must_use]
    pub fn oauth_providers(&self) -> &[ProviderBinding] {
        &self.oauth_providers
    }

    /// Returns when the user was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the user was last updated.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Overwrites the first name when `incoming` is non-empty and differs.
    ///
    /// Returns whether the record changed. Timestamps are left alone.
    pub fn merge_first_name(&mut self, incoming: Option<&str>) -> bool {
        merge_field(&mut self.first_name, incoming)
    }

    /// Overwrites the last name when `incoming` is non-empty and differs.
    pub fn merge_last_name(&mut self, incoming: Option<&str>) -> bool {
        merge_field(&mut self.last_name, incoming)
    }

    /// Appends a provider binding.
    pub fn push_provider(&mut self, binding: ProviderBinding) {
        self.oauth_providers.push(binding);
    }

    /// Stamps the creation and update time.
    pub fn stamp_created(&mut self) {
        let now = Utc::now();
        self.created_at = now;
        self.updated_at = now;
    }

    /// Stamps the update time.
    pub fn stamp_updated(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Returns the representation safe to hand out over the API.
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            login: self.login.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            native: self.is_native(),
            oauth_providers: self.oauth_providers.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn merge_field(field: &mut Option<String>, incoming: Option<&str>) -> bool {
    match incoming {
        Some(value) if !value.is_empty() && field.as_deref() != Some(value) => {
            *field = Some(value.to_string());
            true
        }
        _ => false,
    }
}

/// A user as exposed to API clients; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub native: bool,
    #[serde(default)]
    pub oauth_providers: Vec<ProviderBinding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
