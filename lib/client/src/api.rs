//! Thin HTTP client for the dashgate auth API.

use crate::error::ClientError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Access and refresh token returned by every login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

impl TokenPair {
    /// Reads the `exp` claim of the access token without verifying it.
    ///
    /// Returns `None` when the token is not a readable JWT.
    #[must_use]
    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        #[derive(Deserialize)]
        struct Expiry {
            exp: i64,
        }

        let payload = self.access_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let expiry: Expiry = serde_json::from_slice(&bytes).ok()?;
        DateTime::from_timestamp(expiry.exp, 0)
    }

    /// Whether the access token expires within `margin`, or is unreadable.
    #[must_use]
    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        self.access_expires_at()
            .is_none_or(|exp| exp - margin <= Utc::now())
    }
}

/// Kind of external provider as it appears in API paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OAuth,
    Oidc,
}

impl ProviderKind {
    /// Path segment of the provider kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::Oidc => "oidc",
        }
    }
}

/// A configured external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRef {
    pub kind: ProviderKind,
    pub slug: String,
}

impl ProviderRef {
    /// Path of a provider route, e.g. `device/code`.
    #[must_use]
    pub fn path(&self, route: &str) -> String {
        format!(
            "/api/auth/providers/{}/{}/{}",
            self.kind.as_str(),
            self.slug,
            route
        )
    }
}

/// Entry of the provider listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub slug_id: String,
    pub name: String,
}

/// Providers enabled on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Providers {
    #[serde(default)]
    pub native: bool,
    #[serde(default)]
    pub kubernetes: bool,
    #[serde(default)]
    pub oauth: Vec<ProviderSummary>,
    #[serde(default)]
    pub oidc: Vec<ProviderSummary>,
}

impl Providers {
    /// Finds an external provider by slug.
    #[must_use]
    pub fn find(&self, slug: &str) -> Option<ProviderRef> {
        let found = |list: &[ProviderSummary]| list.iter().any(|p| p.slug_id == slug);
        if found(&self.oauth) {
            Some(ProviderRef {
                kind: ProviderKind::OAuth,
                slug: slug.to_string(),
            })
        } else if found(&self.oidc) {
            Some(ProviderRef {
                kind: ProviderKind::Oidc,
                slug: slug.to_string(),
            })
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

/// HTTP client bound to one dashgate server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a client with the default 10 second timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Report<ClientError>> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Report<ClientError>> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(http_error)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Lists the providers enabled on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn providers(&self) -> Result<Providers, Report<ClientError>> {
        let response = self
            .http
            .get(self.url("/api/auth/providers"))
            .send()
            .await
            .map_err(http_error)?;
        decode(response).await
    }

    /// Exchanges a refresh token for a new pair.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Api` with status 401 if the refresh token was
    /// already used or has expired.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Report<ClientError>> {
        #[derive(Serialize)]
        struct RefreshBody<'a> {
            refresh_token: &'a str,
        }

        self.post_json("/api/auth/refresh", &RefreshBody { refresh_token })
            .await
    }

    pub(crate) async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, Report<ClientError>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(path, "POST json");
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(http_error)?;
        decode(response).await
    }

    pub(crate) async fn post_form<R>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<R, Report<ClientError>>
    where
        R: DeserializeOwned,
    {
        debug!(path, "POST form");
        let response = self
            .http
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .map_err(http_error)?;
        decode(response).await
    }

    pub(crate) async fn post_bearer<R>(&self, path: &str, token: &str) -> Result<R, Report<ClientError>>
    where
        R: DeserializeOwned,
    {
        debug!(path, "POST bearer");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(http_error)?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, Report<ClientError>> {
    let status = response.status();
    let body = response.bytes().await.map_err(http_error)?;

    if status.is_success() {
        return serde_json::from_slice(&body).map_err(|e| {
            ClientError::Http {
                details: format!("unexpected response body: {}", e),
            }
            .into()
        });
    }

    if let Ok(oauth) = serde_json::from_slice::<OAuthErrorBody>(&body) {
        return Err(ClientError::Provider {
            error: oauth.error,
            description: oauth.error_description,
        }
        .into());
    }

    let message = serde_json::from_slice::<MessageBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    }
    .into())
}

fn http_error(e: reqwest::Error) -> ClientError {
    ClientError::Http {
        details: e.to_string(),
    }
}
