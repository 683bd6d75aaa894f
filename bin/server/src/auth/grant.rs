//! Device code and client credentials grants.
//!
//! Both grants are proxied: the CLI talks to `POST .../device/code` and
//! `POST .../token` on this server, which forwards to the provider and
//! answers with a dashgate token pair. Provider OAuth errors such as
//! `authorization_pending` travel back unchanged, so polling stays client
//! driven and each call performs a single exchange.
//!
//! The device authorization and client credentials requests go through
//! `oauth2`. Its device token request polls until approval, so that one
//! exchange is posted directly and decoded with the `oauth2` types.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::ACCEPT;
use axum::routing::post;
use axum::{Extension, Form, Json, Router};
use axum_extra::extract::CookieJar;
use dashgate_identity::{ExternalIdentity, TokenPair};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, ClientId, ClientSecret, DeviceAuthorizationUrl, DeviceCodeErrorResponse,
    ErrorResponseType, RequestTokenError, Scope, StandardDeviceAuthorizationResponse,
    StandardErrorResponse, TokenResponse, TokenUrl,
};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::AppState;
use crate::config::GrantConfig;
use crate::error::{ApiError, ProviderError};

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

/// Client registration used for one grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantClient {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

impl GrantClient {
    /// The provider's registration, with the fields `overrides` sets
    /// replacing the defaults.
    #[must_use]
    pub fn with_overrides(
        overrides: Option<&GrantConfig>,
        client_id: &str,
        client_secret: &str,
        scopes: &[String],
    ) -> Self {
        let overrides = overrides.cloned().unwrap_or_default();
        Self {
            client_id: overrides
                .client_id
                .unwrap_or_else(|| client_id.to_string()),
            client_secret: overrides
                .client_secret
                .unwrap_or_else(|| client_secret.to_string()),
            scopes: if overrides.scopes.is_empty() {
                scopes.to_vec()
            } else {
                overrides.scopes
            },
        }
    }

    fn oauth_client(&self) -> BasicClient {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_auth_type(AuthType::RequestBody);
        if self.client_secret.is_empty() {
            client
        } else {
            client.set_client_secret(ClientSecret::new(self.client_secret.clone()))
        }
    }

    fn oauth_scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        self.scopes.iter().cloned().map(Scope::new)
    }
}

/// Token endpoint answer of a provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Device authorization response, normalized to `verification_uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    pub interval: u64,
}

impl From<&StandardDeviceAuthorizationResponse> for DeviceAuthorization {
    fn from(details: &StandardDeviceAuthorizationResponse) -> Self {
        Self {
            device_code: details.device_code().secret().clone(),
            user_code: details.user_code().secret().clone(),
            verification_uri: details.verification_uri().as_str().to_string(),
            verification_uri_complete: details
                .verification_uri_complete()
                .map(|uri| uri.secret().clone()),
            expires_in: details.expires_in().as_secs(),
            interval: details.interval().as_secs(),
        }
    }
}

/// A provider able to serve the proxied grants.
#[async_trait]
pub trait GrantProvider: Send + Sync + 'static {
    fn token_url(&self) -> &str;

    /// Device authorization endpoint and client, `None` when the flow is
    /// not configured.
    fn device_flow(&self) -> Option<(&str, GrantClient)>;

    /// Scopes requested with client credentials.
    fn client_credentials_scopes(&self) -> Vec<String>;

    /// Identity of the user who approved a device code.
    async fn device_identity(
        &self,
        http: &reqwest::Client,
        client: &GrantClient,
        tokens: ProviderTokens,
    ) -> Result<ExternalIdentity, Report<ProviderError>>;

    /// Identity of a client authenticated with its credentials.
    async fn client_identity(
        &self,
        http: &reqwest::Client,
        client: &GrantClient,
        tokens: ProviderTokens,
    ) -> Result<ExternalIdentity, Report<ProviderError>>;
}

/// Grant routes of provider `P`, which must be installed as an extension.
pub fn routes<P: GrantProvider>() -> Router<Arc<AppState>> {
    Router::new()
        .route("/device/code", post(device_code::<P>))
        .route("/token", post(token::<P>))
}

fn upstream(error: impl std::fmt::Display) -> Report<ProviderError> {
    ProviderError::Upstream {
        details: error.to_string(),
    }
    .into()
}

fn invalid_url(e: impl std::fmt::Display) -> ApiError {
    ApiError::internal(format!("invalid provider URL: {}", e))
}

fn relay<T: ErrorResponseType + AsRef<str>>(response: &StandardErrorResponse<T>) -> ProviderError {
    ProviderError::Relay {
        error: response.error().as_ref().to_string(),
        description: response.error_description().cloned(),
    }
}

fn token_error<RE, T>(e: RequestTokenError<RE, StandardErrorResponse<T>>) -> Report<ProviderError>
where
    RE: std::error::Error + 'static,
    T: ErrorResponseType + AsRef<str> + std::fmt::Display + 'static,
{
    match e {
        RequestTokenError::ServerResponse(response) => {
            debug!(error = response.error().as_ref(), "provider returned an OAuth error");
            relay(&response).into()
        }
        other => upstream(other),
    }
}

fn relayed(body: &Value) -> Option<ProviderError> {
    body.get("error")?;
    let response: DeviceCodeErrorResponse = serde_json::from_value(body.clone()).ok()?;
    Some(relay(&response))
}

/// Posts a form to a provider and returns its JSON answer.
///
/// Some providers answer OAuth errors with 200, so the body is checked for
/// an `error` member before the status.
///
/// # Errors
///
/// Returns `ProviderError::Relay` for OAuth errors and
/// `ProviderError::Upstream` for anything else unexpected.
pub async fn post_form(
    http: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<Value, Report<ProviderError>> {
    let response = http
        .post(url)
        .header(ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(upstream)?;
    let status = response.status();
    let body: Value = response.json().await.map_err(upstream)?;
    if let Some(error) = relayed(&body) {
        debug!(%status, "provider returned an OAuth error");
        return Err(error.into());
    }
    if !status.is_success() {
        return Err(upstream(format!("provider answered {}", status)));
    }
    Ok(body)
}

/// Fetches the user-info document with a provider access token.
///
/// # Errors
///
/// Returns `ProviderError::Rejected` if the token is refused and
/// `ProviderError::Upstream` on transport or decoding failures.
pub async fn fetch_user_info(
    http: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<Value, Report<ProviderError>> {
    let response = http
        .get(url)
        .bearer_auth(access_token)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(upstream)?;
    let status = response.status();
    if status.is_client_error() {
        return Err(ProviderError::Rejected {
            details: format!("user info endpoint answered {}", status),
        }
        .into());
    }
    if !status.is_success() {
        return Err(upstream(format!("user info endpoint answered {}", status)));
    }
    response.json().await.map_err(upstream)
}

#[instrument(skip_all)]
async fn device_code<P: GrantProvider>(
    State(state): State<Arc<AppState>>,
    Extension(provider): Extension<Arc<P>>,
) -> Result<Json<DeviceAuthorization>, ApiError> {
    let (url, client) = provider
        .device_flow()
        .ok_or(ProviderError::NotConfigured { flow: "device code" })
        .map_err(ApiError::from_error)?;

    let url = DeviceAuthorizationUrl::new(url.to_string()).map_err(invalid_url)?;
    let details: StandardDeviceAuthorizationResponse = client
        .oauth_client()
        .set_device_authorization_url(url)
        .exchange_device_code()
        .add_scopes(client.oauth_scopes())
        .request_async(&state.http)
        .await
        .map_err(token_error)?;
    Ok(Json(DeviceAuthorization::from(&details)))
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    #[serde(default)]
    grant_type: String,
    #[serde(default)]
    device_code: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ProviderError::MissingParameter { name })
        .map_err(ApiError::from_error)
}

/// Single device token exchange; pending answers are relayed.
async fn exchange_device_code(
    http: &reqwest::Client,
    token_url: &str,
    client: &GrantClient,
    device_code: &str,
) -> Result<ProviderTokens, Report<ProviderError>> {
    let mut form = vec![
        ("grant_type", DEVICE_CODE_GRANT),
        ("device_code", device_code),
        ("client_id", client.client_id.as_str()),
    ];
    if !client.client_secret.is_empty() {
        form.push(("client_secret", client.client_secret.as_str()));
    }
    let body = post_form(http, token_url, &form).await?;
    serde_json::from_value(body).map_err(upstream)
}

async fn exchange_client_credentials(
    http: &reqwest::Client,
    token_url: &str,
    client: &GrantClient,
) -> Result<ProviderTokens, ApiError> {
    let token = client
        .oauth_client()
        .set_token_uri(TokenUrl::new(token_url.to_string()).map_err(invalid_url)?)
        .exchange_client_credentials()
        .add_scopes(client.oauth_scopes())
        .request_async(http)
        .await
        .map_err(token_error)?;
    Ok(ProviderTokens {
        access_token: token.access_token().secret().clone(),
        id_token: None,
    })
}

#[instrument(skip_all, fields(grant_type = %request.grant_type))]
async fn token<P: GrantProvider>(
    State(state): State<Arc<AppState>>,
    Extension(provider): Extension<Arc<P>>,
    jar: CookieJar,
    Form(request): Form<TokenRequest>,
) -> Result<(CookieJar, Json<TokenPair>), ApiError> {
    let identity = match request.grant_type.as_str() {
        DEVICE_CODE_GRANT => {
            let device_code = required(&request.device_code, "device_code")?;
            let (_, client) = provider
                .device_flow()
                .ok_or(ProviderError::NotConfigured { flow: "device code" })
                .map_err(ApiError::from_error)?;
            let tokens =
                exchange_device_code(&state.http, provider.token_url(), &client, device_code)
                    .await?;
            provider.device_identity(&state.http, &client, tokens).await?
        }
        CLIENT_CREDENTIALS_GRANT => {
            let client = GrantClient {
                client_id: required(&request.client_id, "client_id")?.to_string(),
                client_secret: required(&request.client_secret, "client_secret")?.to_string(),
                scopes: provider.client_credentials_scopes(),
            };
            let tokens =
                exchange_client_credentials(&state.http, provider.token_url(), &client).await?;
            provider.client_identity(&state.http, &client, tokens).await?
        }
        "" => {
            return Err(ApiError::from_error(ProviderError::MissingParameter {
                name: "grant_type",
            }));
        }
        other => {
            return Err(ApiError::from_error(ProviderError::UnsupportedGrant {
                grant_type: other.to_string(),
            }));
        }
    };

    let (jar, pair) = state.login_external(jar, &identity).await?;
    Ok((jar, Json(pair)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn verification_url_is_normalized() {
        let details: StandardDeviceAuthorizationResponse = serde_json::from_value(json!({
            "device_code": "dc",
            "user_code": "ABCD-EFGH",
            "verification_url": "https://example.com/device",
            "expires_in": 900,
        }))
        .expect("parse");
        let authorization = DeviceAuthorization::from(&details);
        assert_eq!(authorization.verification_uri, "https://example.com/device");
        assert_eq!(authorization.interval, 5);

        let normalized = serde_json::to_value(&authorization).expect("serialize");
        assert_eq!(normalized["verification_uri"], "https://example.com/device");
        assert!(normalized.get("verification_url").is_none());
        assert!(normalized.get("verification_uri_complete").is_none());
    }

    #[test]
    fn overrides_replace_only_what_they_set() {
        let defaults = vec!["read:user".to_string()];
        let overrides = GrantConfig {
            client_id: Some("cli".to_string()),
            client_secret: None,
            scopes: Vec::new(),
        };
        let client = GrantClient::with_overrides(Some(&overrides), "web", "secret", &defaults);
        assert_eq!(client.client_id, "cli");
        assert_eq!(client.client_secret, "secret");
        assert_eq!(client.scopes, defaults);

        let plain = GrantClient::with_overrides(None, "web", "secret", &defaults);
        assert_eq!(plain.client_id, "web");
    }

    #[tokio::test]
    async fn oauth_errors_are_relayed_even_with_200() {
        let provider = Router::new().route(
            "/token",
            post(|| async { Json(json!({ "error": "authorization_pending" })) }),
        );
        let base = serve(provider).await;
        let err = post_form(
            &reqwest::Client::new(),
            &format!("{}/token", base),
            &[("grant_type", DEVICE_CODE_GRANT)],
        )
        .await
        .expect_err("pending");
        assert_eq!(
            *err.current_context(),
            ProviderError::Relay {
                error: "authorization_pending".to_string(),
                description: None,
            }
        );
    }

    #[tokio::test]
    async fn failures_without_oauth_body_are_upstream_errors() {
        let provider = Router::new().route(
            "/token",
            post(|| async { (StatusCode::BAD_GATEWAY, Json(json!({ "oops": true }))) }),
        );
        let base = serve(provider).await;
        let err = post_form(&reqwest::Client::new(), &format!("{}/token", base), &[])
            .await
            .expect_err("bad gateway");
        assert!(matches!(
            err.current_context(),
            ProviderError::Upstream { .. }
        ));
    }

    #[tokio::test]
    async fn refused_user_info_token_is_rejected() {
        let provider = Router::new().route(
            "/user",
            axum::routing::get(|| async { StatusCode::UNAUTHORIZED }),
        );
        let base = serve(provider).await;
        let err = fetch_user_info(&reqwest::Client::new(), &format!("{}/user", base), "t")
            .await
            .expect_err("refused");
        assert!(matches!(
            err.current_context(),
            ProviderError::Rejected { .. }
        ));
    }
}
