//! Centralized server configuration.
//!
//! Configuration is loaded via the `config` crate from an optional file
//! (path in `DASHGATE_CONFIG`) and from environment variables prefixed with
//! `DASHGATE__`, using `__` as the nesting separator:
//!
//! ```text
//! DASHGATE__LISTEN_ADDR=0.0.0.0:8080
//! DASHGATE__SECURITY__ENABLE_AUTH=true
//! DASHGATE__SECURITY__AUTHENTICATION__PROVIDERS__ENABLE_NATIVE=true
//! ```
//!
//! Lists of providers and guest permissions are easier to express in the
//! file.

use axum_extra::extract::cookie::SameSite;
use dashgate_authz::Permission;
use oauth2::url::Url;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Environment variable holding the optional configuration file path.
pub const CONFIG_PATH_ENV: &str = "DASHGATE_CONFIG";

const ENV_PREFIX: &str = "DASHGATE";

/// Required length of the signing key, in bytes.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    Load { details: String },
    /// The configuration was read but is not usable.
    Invalid { details: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { details } => write!(f, "failed to load configuration: {}", details),
            Self::Invalid { details } => write!(f, "invalid configuration: {}", details),
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(details: impl Into<String>) -> Report<ConfigError> {
    ConfigError::Invalid {
        details: details.into(),
    }
    .into()
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// PostgreSQL connection URL. In-memory stores are used when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Connect and request timeout of outbound HTTP calls.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_url: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            security: SecurityConfig::default(),
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// When false, every request is anonymous and every check passes.
    #[serde(default = "default_true")]
    pub enable_auth: bool,

    /// Token signing key, exactly 32 bytes.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// File holding the token signing key.
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,

    #[serde(default)]
    pub cookie: CookieConfig,

    #[serde(default)]
    pub authentication: AuthenticationConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            encryption_key: None,
            encryption_key_file: None,
            cookie: CookieConfig::default(),
            authentication: AuthenticationConfig::default(),
            authorization: AuthorizationConfig::default(),
        }
    }
}

/// `SameSite` attribute of every cookie the server sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Lax,
    Strict,
    None,
}

/// Cookie attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Defaults to `none` for secure cookies and `lax` otherwise.
    #[serde(default)]
    pub same_site: Option<SameSitePolicy>,

    /// Whether cookies carry the `Secure` flag (requires HTTPS).
    #[serde(default = "default_true")]
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            same_site: None,
            secure: true,
        }
    }
}

impl CookieConfig {
    /// Resolves the effective `SameSite` attribute.
    #[must_use]
    pub fn same_site(&self) -> SameSite {
        match self.same_site {
            Some(SameSitePolicy::Lax) => SameSite::Lax,
            Some(SameSitePolicy::Strict) => SameSite::Strict,
            Some(SameSitePolicy::None) => SameSite::None,
            None if self.secure => SameSite::None,
            None => SameSite::Lax,
        }
    }
}

/// Token lifetimes, sign-up and identity providers.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationConfig {
    #[serde(default = "default_access_token_ttl_minutes")]
    pub access_token_ttl_minutes: i64,

    #[serde(default = "default_refresh_token_ttl_minutes")]
    pub refresh_token_ttl_minutes: i64,

    /// When true, only callers allowed to create users may sign others up.
    #[serde(default)]
    pub disable_sign_up: bool,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_access_token_ttl_minutes() -> i64 {
    dashgate_identity::token::DEFAULT_ACCESS_TTL_MINUTES
}

fn default_refresh_token_ttl_minutes() -> i64 {
    dashgate_identity::token::DEFAULT_REFRESH_TTL_MINUTES
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_minutes: default_access_token_ttl_minutes(),
            refresh_token_ttl_minutes: default_refresh_token_ttl_minutes(),
            disable_sign_up: false,
            providers: ProvidersConfig::default(),
        }
    }
}

/// Enabled identity providers.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_true")]
    pub enable_native: bool,

    #[serde(default)]
    pub oauth: Vec<OAuthProviderConfig>,

    #[serde(default)]
    pub oidc: Vec<OidcProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enable_native: true,
            oauth: Vec::new(),
            oidc: Vec::new(),
        }
    }
}

/// A generic OAuth 2.0 provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    /// Path segment identifying the provider.
    pub slug_id: String,
    /// Display name.
    pub name: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Derived from forwarded headers when unset.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub disable_pkce: bool,
    pub auth_url: String,
    pub token_url: String,
    pub user_infos_url: String,
    /// Enables the device code flow.
    #[serde(default)]
    pub device_auth_url: Option<String>,
    #[serde(default)]
    pub device_code: Option<GrantConfig>,
    #[serde(default)]
    pub client_credentials: Option<GrantConfig>,
    /// User-info property used as login before the defaults.
    #[serde(default)]
    pub custom_login_property: Option<String>,
}

/// Credentials used by one grant instead of the provider's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// An OpenID Connect provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcProviderConfig {
    pub slug_id: String,
    pub name: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub disable_pkce: bool,
    /// Issuer URL, used for discovery.
    pub issuer: String,
    /// Extra query parameters of the authorization request.
    #[serde(default)]
    pub url_params: BTreeMap<String, String>,
    /// Claims tried, in order, before the subject when deriving the login.
    #[serde(default)]
    pub login_claims: Vec<String>,
    #[serde(default)]
    pub device_auth_url: Option<String>,
    #[serde(default)]
    pub device_code: Option<GrantConfig>,
    #[serde(default)]
    pub client_credentials: Option<GrantConfig>,
}

fn default_oidc_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

/// Authorization configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationConfig {
    /// Permissions every caller holds.
    #[serde(default)]
    pub guest_permissions: Vec<Permission>,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,
}

/// Kubernetes token delegation.
#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "default_kubernetes_api_server")]
    pub api_server: String,

    /// Service account token the server authenticates its reviews with.
    #[serde(default = "default_kubernetes_token_file")]
    pub token_file: PathBuf,

    /// CA bundle of the API server. System roots are used when unset.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

fn default_kubernetes_api_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_kubernetes_token_file() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            enable: false,
            api_server: default_kubernetes_api_server(),
            token_file: default_kubernetes_token_file(),
            ca_file: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the optional file and the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be read or parsed.
    pub fn load() -> Result<Self, Report<ConfigError>> {
        let file = std::env::var(CONFIG_PATH_ENV).ok();
        Self::from_sources(file.as_deref(), None)
    }

    /// Loads configuration from `file` and from `env`, or from the process
    /// environment when `env` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be read or parsed.
    pub fn from_sources(
        file: Option<&str>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, Report<ConfigError>> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                ConfigError::Load {
                    details: e.to_string(),
                }
                .into()
            })
    }

    /// Checks cross-field rules the types cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violated rule.
    pub fn verify(&self) -> Result<(), Report<ConfigError>> {
        let security = &self.security;
        let authn = &security.authentication;
        let providers = &authn.providers;

        if security.encryption_key.is_some() && security.encryption_key_file.is_some() {
            return Err(invalid(
                "encryption_key and encryption_key_file are mutually exclusive",
            ));
        }
        if let Some(key) = &security.encryption_key {
            check_key_len(key.as_bytes())?;
        }
        if authn.access_token_ttl_minutes <= 0 || authn.refresh_token_ttl_minutes <= 0 {
            return Err(invalid("token lifetimes must be positive"));
        }
        if self.http_timeout_seconds == 0 {
            return Err(invalid("http_timeout_seconds must be positive"));
        }

        let any_provider = providers.enable_native
            || !providers.oauth.is_empty()
            || !providers.oidc.is_empty()
            || security.authorization.kubernetes.enable;
        if security.enable_auth && !any_provider {
            return Err(invalid(
                "at least one authentication provider must be enabled when auth is enabled",
            ));
        }

        let mut slugs = HashSet::new();
        for oauth in &providers.oauth {
            check_slug(&oauth.slug_id, &mut slugs)?;
            require("oauth", &oauth.slug_id, "name", &oauth.name)?;
            require("oauth", &oauth.slug_id, "client_id", &oauth.client_id)?;
            require_url("oauth", &oauth.slug_id, "auth_url", &oauth.auth_url)?;
            require_url("oauth", &oauth.slug_id, "token_url", &oauth.token_url)?;
            require_url("oauth", &oauth.slug_id, "user_infos_url", &oauth.user_infos_url)?;
            if let Some(url) = &oauth.device_auth_url {
                require_url("oauth", &oauth.slug_id, "device_auth_url", url)?;
            }
            if let Some(url) = &oauth.redirect_uri {
                require_url("oauth", &oauth.slug_id, "redirect_uri", url)?;
            }
        }
        for oidc in &providers.oidc {
            check_slug(&oidc.slug_id, &mut slugs)?;
            require("oidc", &oidc.slug_id, "name", &oidc.name)?;
            require("oidc", &oidc.slug_id, "client_id", &oidc.client_id)?;
            require_url("oidc", &oidc.slug_id, "issuer", &oidc.issuer)?;
            if let Some(url) = &oidc.device_auth_url {
                require_url("oidc", &oidc.slug_id, "device_auth_url", url)?;
            }
            if let Some(url) = &oidc.redirect_uri {
                require_url("oidc", &oidc.slug_id, "redirect_uri", url)?;
            }
        }

        let kubernetes = &security.authorization.kubernetes;
        if kubernetes.enable {
            require_url("kubernetes", "-", "api_server", &kubernetes.api_server)?;
        }
        Ok(())
    }

    /// Reads the configured signing key, if any.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if the key file cannot be read and
    /// `ConfigError::Invalid` if the key is not 32 bytes long.
    pub fn encryption_key(&self) -> Result<Option<Vec<u8>>, Report<ConfigError>> {
        let key = match (
            &self.security.encryption_key,
            &self.security.encryption_key_file,
        ) {
            (Some(key), _) => key.as_bytes().to_vec(),
            (None, Some(path)) => {
                let content = std::fs::read(path).map_err(|e| ConfigError::Load {
                    details: format!("{}: {}", path.display(), e),
                })?;
                trim_trailing_newline(content)
            }
            (None, None) => return Ok(None),
        };
        check_key_len(&key)?;
        Ok(Some(key))
    }
}

fn trim_trailing_newline(mut content: Vec<u8>) -> Vec<u8> {
    while content.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
        content.pop();
    }
    content
}

fn check_key_len(key: &[u8]) -> Result<(), Report<ConfigError>> {
    if key.len() != ENCRYPTION_KEY_LEN {
        return Err(invalid(format!(
            "encryption key must be exactly {} bytes, got {}",
            ENCRYPTION_KEY_LEN,
            key.len()
        )));
    }
    Ok(())
}

fn check_slug(slug: &str, seen: &mut HashSet<String>) -> Result<(), Report<ConfigError>> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(invalid(format!(
            "provider slug_id '{}' must be non-empty and made of [A-Za-z0-9_-]",
            slug
        )));
    }
    if !seen.insert(slug.to_string()) {
        return Err(invalid(format!(
            "provider slug_id '{}' is used more than once",
            slug
        )));
    }
    Ok(())
}

fn require(kind: &str, slug: &str, field: &str, value: &str) -> Result<(), Report<ConfigError>> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} provider '{}': {} is required", kind, slug, field)));
    }
    Ok(())
}

fn require_url(kind: &str, slug: &str, field: &str, value: &str) -> Result<(), Report<ConfigError>> {
    require(kind, slug, field, value)?;
    Url::parse(value).map_err(|e| {
        invalid(format!(
            "{} provider '{}': {} is not a valid URL: {}",
            kind, slug, field, e
        ))
    })?;
    Ok(())
}
