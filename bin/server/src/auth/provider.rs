//! Identity provider endpoints.
//!
//! Every provider mounts its own routes under
//! `/api/auth/providers/{kind}[/{slug}]`. [`endpoints_from_config`] is the
//! only place deciding which endpoints exist.

use axum::Router;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use rootcause::prelude::Report;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::AppState;
use super::cookies::CookieSettings;
use super::kubernetes::KubernetesEndpoint;
use super::native::NativeEndpoint;
use super::oauth::OAuthEndpoint;
use super::oidc::OidcEndpoint;
use crate::config::ServerConfig;
use crate::error::{ApiError, StartupError};

/// Prefix of every provider route.
pub const PROVIDERS_PATH: &str = "/api/auth/providers";

/// Family of an identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Native,
    OAuth,
    Oidc,
    Kubernetes,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::OAuth => "oauth",
            Self::Oidc => "oidc",
            Self::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A login endpoint backed by one identity provider.
pub trait ProviderEndpoint: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Configured slug; `None` for singleton providers.
    fn slug(&self) -> Option<&str>;

    /// Display name.
    fn name(&self) -> &str;

    /// Routes of this endpoint, relative to [`mount_path`].
    fn routes(self: Arc<Self>) -> Router<Arc<AppState>>;
}

/// Absolute path the routes of an endpoint are mounted at.
#[must_use]
pub fn mount_path(kind: ProviderKind, slug: Option<&str>) -> String {
    match slug {
        Some(slug) => format!("{}/{}/{}", PROVIDERS_PATH, kind, slug),
        None => format!("{}/{}", PROVIDERS_PATH, kind),
    }
}

fn first_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves the callback URI handed to a provider.
///
/// A configured URI wins. Otherwise it is derived from the forwarded
/// headers, then from `Host`.
///
/// # Errors
///
/// Returns a bad request if no host can be determined.
pub fn callback_uri(
    configured: Option<&str>,
    headers: &HeaderMap,
    mount: &str,
) -> Result<String, ApiError> {
    if let Some(uri) = configured {
        return Ok(uri.to_string());
    }
    let proto = first_header(headers, "x-forwarded-proto").unwrap_or("http");
    let host = first_header(headers, "x-forwarded-host")
        .or_else(|| first_header(headers, HOST.as_str()))
        .ok_or_else(|| ApiError::bad_request("cannot derive the callback URL without a Host header"))?;
    Ok(format!("{}://{}{}/callback", proto, host, mount))
}

/// Slug and display name of a configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    pub slug_id: String,
    pub name: String,
}

/// Providers advertised on `GET /api/auth/providers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderListing {
    pub native: bool,
    pub kubernetes: bool,
    pub oauth: Vec<ProviderSummary>,
    pub oidc: Vec<ProviderSummary>,
}

impl ProviderListing {
    #[must_use]
    pub fn from_endpoints(endpoints: &[Arc<dyn ProviderEndpoint>]) -> Self {
        let mut listing = Self::default();
        for endpoint in endpoints {
            let summary = || ProviderSummary {
                slug_id: endpoint.slug().unwrap_or_default().to_string(),
                name: endpoint.name().to_string(),
            };
            match endpoint.kind() {
                ProviderKind::Native => listing.native = true,
                ProviderKind::Kubernetes => listing.kubernetes = true,
                ProviderKind::OAuth => listing.oauth.push(summary()),
                ProviderKind::Oidc => listing.oidc.push(summary()),
            }
        }
        listing
    }
}

/// Builds the endpoints enabled in `config`.
///
/// OIDC providers are discovered here, so an unreachable issuer fails
/// startup.
///
/// # Errors
///
/// Returns `StartupError::Provider` if a provider cannot be set up.
pub async fn endpoints_from_config(
    config: &ServerConfig,
    http: &reqwest::Client,
    cookies: CookieSettings,
) -> Result<Vec<Arc<dyn ProviderEndpoint>>, Report<StartupError>> {
    let providers = &config.security.authentication.providers;
    let mut endpoints: Vec<Arc<dyn ProviderEndpoint>> = Vec::new();

    if providers.enable_native {
        endpoints.push(Arc::new(NativeEndpoint::new()));
    }
    for oauth in &providers.oauth {
        endpoints.push(Arc::new(OAuthEndpoint::new(oauth.clone(), cookies)?));
    }
    for oidc in &providers.oidc {
        endpoints.push(Arc::new(
            OidcEndpoint::discover(oidc.clone(), http, cookies).await?,
        ));
    }
    let kubernetes = &config.security.authorization.kubernetes;
    if kubernetes.enable {
        endpoints.push(Arc::new(
            KubernetesEndpoint::new(kubernetes, config.http_timeout_seconds).await?,
        ));
    }

    for endpoint in &endpoints {
        info!(
            kind = %endpoint.kind(),
            slug = endpoint.slug().unwrap_or("-"),
            "identity provider enabled"
        );
    }
    Ok(endpoints)
}
