//! OpenID Connect provider built on the openidconnect crate.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Extension, Router};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashgate_identity::{ExternalIdentity, OidcUserInfo, ProviderBinding, UserInfoStrategy};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreProviderMetadata,
};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet, EndpointNotSet,
    EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, TokenResponse,
};
use rootcause::prelude::Report;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::AppState;
use super::cookies::CookieSettings;
use super::grant::{self, GrantClient, GrantProvider, ProviderTokens, fetch_user_info};
use super::oauth::{CallbackQuery, LoginQuery, local_redirect};
use super::provider::{ProviderEndpoint, ProviderKind, callback_uri, mount_path};
use super::state_store::{
    CODE_VERIFIER_COOKIE, CallbackError, NONCE_COOKIE, REDIRECT_COOKIE, STATE_COOKIE, StateStore,
};
use crate::config::OidcProviderConfig;
use crate::error::{ApiError, ProviderError, StartupError};

/// Client built from discovered metadata: the token and user-info
/// endpoints may or may not be advertised.
type DiscoveredClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// An OpenID Connect provider, discovered at startup.
pub struct OidcEndpoint {
    config: OidcProviderConfig,
    metadata: CoreProviderMetadata,
    token_url: String,
    mount: String,
    states: StateStore,
    user_info: OidcUserInfo,
}

fn rejected(details: impl std::fmt::Display) -> Report<ProviderError> {
    ProviderError::Rejected {
        details: details.to_string(),
    }
    .into()
}

fn upstream(details: impl std::fmt::Display) -> Report<ProviderError> {
    ProviderError::Upstream {
        details: details.to_string(),
    }
    .into()
}

/// Decodes the claims of a compact JWT without checking its signature.
///
/// Only called on tokens the verifier already accepted; the typed claims
/// drop custom members the login may be derived from.
fn id_token_payload(raw: &str) -> Result<Map<String, Value>, Report<ProviderError>> {
    let payload = raw
        .split('.')
        .nth(1)
        .ok_or_else(|| rejected("ID token is not a compact JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| rejected(format!("failed to decode ID token payload: {}", e)))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(rejected("ID token payload is not a JSON object")),
        Err(e) => Err(rejected(format!("failed to parse ID token payload: {}", e))),
    }
}

/// Adds user-info members missing from the ID token claims.
///
/// # Errors
///
/// Returns `ProviderError::Rejected` if both carry different subjects.
fn merge_user_info(
    claims: &mut Map<String, Value>,
    user_info: Value,
) -> Result<(), Report<ProviderError>> {
    let Value::Object(user_info) = user_info else {
        return Err(upstream("user info is not a JSON object"));
    };
    if let (Some(expected), Some(actual)) = (claims.get("sub"), user_info.get("sub")) {
        if expected != actual {
            return Err(rejected("user info subject does not match the ID token"));
        }
    }
    for (key, value) in user_info {
        claims.entry(key).or_insert(value);
    }
    Ok(())
}

impl OidcEndpoint {
    /// Discovers the provider and creates the endpoint.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Provider` if discovery fails or the provider
    /// has no token endpoint.
    pub async fn discover(
        config: OidcProviderConfig,
        http: &reqwest::Client,
        cookies: CookieSettings,
    ) -> Result<Self, Report<StartupError>> {
        let failure = |details: String| StartupError::Provider {
            name: config.slug_id.clone(),
            details,
        };
        let issuer_url = IssuerUrl::new(config.issuer.clone())
            .map_err(|e| failure(format!("invalid issuer URL: {}", e)))?;
        let metadata = CoreProviderMetadata::discover_async(issuer_url, http)
            .await
            .map_err(|e| failure(format!("discovery failed: {}", e)))?;
        let token_url = metadata
            .token_endpoint()
            .map(|url| url.url().to_string())
            .ok_or_else(|| failure("provider metadata has no token endpoint".to_string()))?;

        debug!(issuer = %config.issuer, "discovered OIDC provider");
        Ok(Self {
            user_info: OidcUserInfo::new(config.issuer.clone(), config.login_claims.clone()),
            mount: mount_path(ProviderKind::Oidc, Some(&config.slug_id)),
            states: StateStore::new(cookies),
            token_url,
            metadata,
            config,
        })
    }

    fn client(&self, client_id: &str, client_secret: &str) -> DiscoveredClient {
        let secret = Some(client_secret.to_string())
            .filter(|s| !s.is_empty())
            .map(ClientSecret::new);
        CoreClient::from_provider_metadata(
            self.metadata.clone(),
            ClientId::new(client_id.to_string()),
            secret,
        )
    }

    async fn add_user_info(
        &self,
        http: &reqwest::Client,
        access_token: &str,
        claims: &mut Map<String, Value>,
    ) -> Result<(), Report<ProviderError>> {
        if let Some(url) = self.metadata.userinfo_endpoint() {
            let document = fetch_user_info(http, url.url().as_str(), access_token).await?;
            merge_user_info(claims, document)?;
        }
        Ok(())
    }

    fn identity(&self, claims: Map<String, Value>) -> Result<ExternalIdentity, Report<ProviderError>> {
        self.user_info
            .identity(&Value::Object(claims))
            .map_err(upstream)
    }
}

impl ProviderEndpoint for OidcEndpoint {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Oidc
    }

    fn slug(&self) -> Option<&str> {
        Some(&self.config.slug_id)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn routes(self: Arc<Self>) -> Router<Arc<AppState>> {
        grant::routes::<Self>()
            .route("/login", get(login))
            .route("/callback", get(callback))
            .layer(Extension(self))
    }
}

#[async_trait]
impl GrantProvider for OidcEndpoint {
    fn token_url(&self) -> &str {
        &self.token_url
    }

    fn device_flow(&self) -> Option<(&str, GrantClient)> {
        let url = self.config.device_auth_url.as_deref()?;
        let config = &self.config;
        Some((
            url,
            GrantClient::with_overrides(
                config.device_code.as_ref(),
                &config.client_id,
                &config.client_secret,
                &config.scopes,
            ),
        ))
    }

    fn client_credentials_scopes(&self) -> Vec<String> {
        self.config
            .client_credentials
            .as_ref()
            .map(|grant| grant.scopes.clone())
            .unwrap_or_default()
    }

    async fn device_identity(
        &self,
        http: &reqwest::Client,
        client: &GrantClient,
        tokens: ProviderTokens,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        let mut claims = Map::new();
        if let Some(raw) = &tokens.id_token {
            let id_token: CoreIdToken =
                serde_json::from_value(Value::String(raw.clone())).map_err(rejected)?;
            let verifier_client = self.client(&client.client_id, &client.client_secret);
            id_token
                .claims(
                    &verifier_client.id_token_verifier(),
                    |_: Option<&Nonce>| -> Result<(), String> { Ok(()) },
                )
                .map_err(rejected)?;
            claims = id_token_payload(raw)?;
        }
        self.add_user_info(http, &tokens.access_token, &mut claims)
            .await?;
        if claims.is_empty() {
            return Err(rejected(
                "provider returned neither an ID token nor user info",
            ));
        }
        self.identity(claims)
    }

    async fn client_identity(
        &self,
        _http: &reqwest::Client,
        client: &GrantClient,
        _tokens: ProviderTokens,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        Ok(ExternalIdentity::new(client.client_id.clone()).with_provider(
            ProviderBinding::new(self.config.issuer.clone(), client.client_id.clone()),
        ))
    }
}

fn invalid_url(e: impl std::fmt::Display) -> ApiError {
    ApiError::internal(format!("invalid provider URL: {}", e))
}

#[instrument(skip_all, fields(provider = %endpoint.config.slug_id))]
async fn login(
    Extension(endpoint): Extension<Arc<OidcEndpoint>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Result<(PrivateCookieJar, Redirect), ApiError> {
    let config = &endpoint.config;
    let redirect_uri = callback_uri(config.redirect_uri.as_deref(), &headers, &endpoint.mount)?;
    let client = endpoint
        .client(&config.client_id, &config.client_secret)
        .set_redirect_uri(RedirectUrl::new(redirect_uri).map_err(invalid_url)?);

    let mut request = client.authorize_url(
        CoreAuthenticationFlow::AuthorizationCode,
        CsrfToken::new_random,
        Nonce::new_random,
    );
    // openid is always requested
    for scope in config.scopes.iter().filter(|s| s.as_str() != "openid") {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    for (name, value) in &config.url_params {
        request = request.add_extra_param(name.clone(), value.clone());
    }

    let states = &endpoint.states;
    let mut jar = states.jar(&headers);
    if !config.disable_pkce {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        request = request.set_pkce_challenge(challenge);
        jar = states.save(jar, CODE_VERIFIER_COOKIE, verifier.secret().clone());
    }
    let (url, csrf, nonce) = request.url();
    jar = states.save(jar, STATE_COOKIE, csrf.secret().clone());
    jar = states.save(jar, NONCE_COOKIE, nonce.secret().clone());
    if let Some(target) = local_redirect(query.redirect) {
        jar = states.save(jar, REDIRECT_COOKIE, target);
    }

    debug!("redirecting to the provider");
    Ok((jar, Redirect::to(url.as_str())))
}

#[instrument(skip_all, fields(provider = %endpoint.config.slug_id))]
async fn callback(
    State(state): State<Arc<AppState>>,
    Extension(endpoint): Extension<Arc<OidcEndpoint>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<(PrivateCookieJar, CookieJar, Redirect), CallbackError> {
    complete_login(&state, &endpoint, &headers, query)
        .await
        .map_err(|error| endpoint.states.abort(&headers, error))
}

async fn complete_login(
    state: &AppState,
    endpoint: &OidcEndpoint,
    headers: &HeaderMap,
    query: CallbackQuery,
) -> Result<(PrivateCookieJar, CookieJar, Redirect), ApiError> {
    if let Some(error) = query.error {
        return Err(ApiError::from_error(ProviderError::Rejected { details: error }));
    }
    let config = &endpoint.config;

    let states = &endpoint.states;
    let jar = states
        .read_and_compare(states.jar(headers), STATE_COOKIE, query.state.as_deref())
        .await?;
    let (jar, nonce) = states.read(jar, NONCE_COOKIE).await?;
    let (jar, verifier) = if config.disable_pkce {
        (jar, None)
    } else {
        let (jar, verifier) = states.read(jar, CODE_VERIFIER_COOKIE).await?;
        (jar, Some(verifier))
    };
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or(ProviderError::MissingParameter { name: "code" })
        .map_err(ApiError::from_error)?;

    let redirect_uri = callback_uri(config.redirect_uri.as_deref(), headers, &endpoint.mount)?;
    let client = endpoint
        .client(&config.client_id, &config.client_secret)
        .set_redirect_uri(RedirectUrl::new(redirect_uri).map_err(invalid_url)?);
    let mut exchange = client
        .exchange_code(AuthorizationCode::new(code))
        .map_err(|e| ApiError::internal(format!("token endpoint error: {}", e)))?;
    if let Some(verifier) = verifier {
        exchange = exchange.set_pkce_verifier(PkceCodeVerifier::new(verifier));
    }
    let response = exchange
        .request_async(&state.http)
        .await
        .map_err(|e| match e {
            RequestTokenError::ServerResponse(response) => rejected(response),
            other => upstream(other),
        })?;

    let id_token = response
        .id_token()
        .ok_or_else(|| rejected("no ID token in the token response"))?;
    id_token
        .claims(&client.id_token_verifier(), &Nonce::new(nonce))
        .map_err(|e| rejected(format!("ID token validation failed: {}", e)))?;

    let raw = serde_json::to_value(&response)
        .ok()
        .and_then(|v| v.get("id_token").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| rejected("no ID token in the token response"))?;
    let mut claims = id_token_payload(&raw)?;
    endpoint
        .add_user_info(&state.http, response.access_token().secret(), &mut claims)
        .await?;
    let identity = endpoint.identity(claims)?;

    let (session, _) = state.login_external(CookieJar::new(), &identity).await?;
    let (jar, target) = states.take(jar, REDIRECT_COOKIE);
    Ok((jar, session, Redirect::to(target.as_deref().unwrap_or("/"))))
}
