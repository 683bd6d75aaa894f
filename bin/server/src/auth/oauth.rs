//! Generic OAuth 2.0 provider: authorization code with PKCE, device code
//! and client credentials.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Extension, Router};
use axum_extra::extract::CookieJar;
use axum_extra::extract::PrivateCookieJar;
use dashgate_identity::{ExternalIdentity, OAuthUserInfo, UserInfoStrategy};
use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use rootcause::prelude::Report;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::AppState;
use super::cookies::CookieSettings;
use super::grant::{self, GrantClient, GrantProvider, ProviderTokens, fetch_user_info};
use super::provider::{ProviderEndpoint, ProviderKind, callback_uri, mount_path};
use super::state_store::{
    CODE_VERIFIER_COOKIE, CallbackError, REDIRECT_COOKIE, STATE_COOKIE, StateStore,
};
use crate::config::OAuthProviderConfig;
use crate::error::{ApiError, ProviderError, StartupError};

/// An OAuth 2.0 provider without OpenID Connect.
pub struct OAuthEndpoint {
    config: OAuthProviderConfig,
    mount: String,
    states: StateStore,
    user_info: OAuthUserInfo,
}

impl OAuthEndpoint {
    /// Creates the endpoint. OAuth has no issuer, so the host of the
    /// authorization URL stands in for it in provider bindings.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Provider` if the authorization URL is invalid.
    pub fn new(
        config: OAuthProviderConfig,
        cookies: CookieSettings,
    ) -> Result<Self, Report<StartupError>> {
        let issuer = Url::parse(&config.auth_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| StartupError::Provider {
                name: config.slug_id.clone(),
                details: format!("auth_url '{}' has no host", config.auth_url),
            })?;
        let user_info = OAuthUserInfo::new(issuer, config.custom_login_property.as_deref());
        Ok(Self {
            mount: mount_path(ProviderKind::OAuth, Some(&config.slug_id)),
            states: StateStore::new(cookies),
            user_info,
            config,
        })
    }

    fn client_id(&self) -> ClientId {
        ClientId::new(self.config.client_id.clone())
    }

    fn client_secret(&self) -> Option<ClientSecret> {
        Some(self.config.client_secret.clone())
            .filter(|s| !s.is_empty())
            .map(ClientSecret::new)
    }

    async fn identity(
        &self,
        http: &reqwest::Client,
        access_token: &str,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        let document = fetch_user_info(http, &self.config.user_infos_url, access_token).await?;
        self.user_info.identity(&document).map_err(|e| {
            ProviderError::Upstream {
                details: e.to_string(),
            }
            .into()
        })
    }
}

impl ProviderEndpoint for OAuthEndpoint {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OAuth
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
impl GrantProvider for OAuthEndpoint {
    fn token_url(&self) -> &str {
        &self.config.token_url
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
        let config = &self.config;
        GrantClient::with_overrides(
            config.client_credentials.as_ref(),
            &config.client_id,
            &config.client_secret,
            &config.scopes,
        )
        .scopes
    }

    async fn device_identity(
        &self,
        http: &reqwest::Client,
        _client: &GrantClient,
        tokens: ProviderTokens,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        self.identity(http, &tokens.access_token).await
    }

    async fn client_identity(
        &self,
        http: &reqwest::Client,
        _client: &GrantClient,
        tokens: ProviderTokens,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        self.identity(http, &tokens.access_token).await
    }
}

/// Query of the login routes.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Where to send the browser after a successful login.
    #[serde(default)]
    pub redirect: Option<String>,
}

/// Query the provider appends to the callback URL.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Keeps only same-site absolute paths as post-login targets.
pub(crate) fn local_redirect(target: Option<String>) -> Option<String> {
    target.filter(|t| t.starts_with('/') && !t.starts_with("//") && !t.contains('\\'))
}

fn invalid_url(e: impl std::fmt::Display) -> ApiError {
    ApiError::internal(format!("invalid provider URL: {}", e))
}

#[instrument(skip_all, fields(provider = %endpoint.config.slug_id))]
async fn login(
    Extension(endpoint): Extension<Arc<OAuthEndpoint>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Result<(PrivateCookieJar, Redirect), ApiError> {
    let redirect_uri = callback_uri(endpoint.config.redirect_uri.as_deref(), &headers, &endpoint.mount)?;
    let mut client = BasicClient::new(endpoint.client_id())
        .set_auth_uri(AuthUrl::new(endpoint.config.auth_url.clone()).map_err(invalid_url)?)
        .set_redirect_uri(RedirectUrl::new(redirect_uri).map_err(invalid_url)?);
    if let Some(secret) = endpoint.client_secret() {
        client = client.set_client_secret(secret);
    }

    let mut request = client.authorize_url(CsrfToken::new_random);
    for scope in &endpoint.config.scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }

    let states = &endpoint.states;
    let mut jar = states.jar(&headers);
    if !endpoint.config.disable_pkce {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        request = request.set_pkce_challenge(challenge);
        jar = states.save(jar, CODE_VERIFIER_COOKIE, verifier.secret().clone());
    }
    let (url, csrf) = request.url();
    jar = states.save(jar, STATE_COOKIE, csrf.secret().clone());
    if let Some(target) = local_redirect(query.redirect) {
        jar = states.save(jar, REDIRECT_COOKIE, target);
    }

    debug!("redirecting to the provider");
    Ok((jar, Redirect::to(url.as_str())))
}

#[instrument(skip_all, fields(provider = %endpoint.config.slug_id))]
async fn callback(
    State(state): State<Arc<AppState>>,
    Extension(endpoint): Extension<Arc<OAuthEndpoint>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<(PrivateCookieJar, CookieJar, Redirect), CallbackError> {
    complete_login(&state, &endpoint, &headers, query)
        .await
        .map_err(|error| endpoint.states.abort(&headers, error))
}

async fn complete_login(
    state: &AppState,
    endpoint: &OAuthEndpoint,
    headers: &HeaderMap,
    query: CallbackQuery,
) -> Result<(PrivateCookieJar, CookieJar, Redirect), ApiError> {
    if let Some(error) = query.error {
        return Err(ApiError::from_error(ProviderError::Rejected { details: error }));
    }

    let states = &endpoint.states;
    let jar = states
        .read_and_compare(states.jar(headers), STATE_COOKIE, query.state.as_deref())
        .await?;
    let (jar, verifier) = if endpoint.config.disable_pkce {
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

    let redirect_uri = callback_uri(endpoint.config.redirect_uri.as_deref(), headers, &endpoint.mount)?;
    let mut client = BasicClient::new(endpoint.client_id())
        .set_token_uri(TokenUrl::new(endpoint.config.token_url.clone()).map_err(invalid_url)?)
        .set_redirect_uri(RedirectUrl::new(redirect_uri).map_err(invalid_url)?);
    if let Some(secret) = endpoint.client_secret() {
        client = client.set_client_secret(secret);
    }

    let mut exchange = client.exchange_code(AuthorizationCode::new(code));
    if let Some(verifier) = verifier {
        exchange = exchange.set_pkce_verifier(PkceCodeVerifier::new(verifier));
    }
    let token = exchange
        .request_async(&state.http)
        .await
        .map_err(|e| match e {
            RequestTokenError::ServerResponse(response) => ProviderError::Rejected {
                details: response.to_string(),
            },
            other => ProviderError::Upstream {
                details: other.to_string(),
            },
        })
        .map_err(ApiError::from_error)?;

    let identity = endpoint
        .identity(&state.http, token.access_token().secret())
        .await?;
    let (session, _) = state.login_external(CookieJar::new(), &identity).await?;
    let (jar, target) = states.take(jar, REDIRECT_COOKIE);
    Ok((jar, session, Redirect::to(target.as_deref().unwrap_or("/"))))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::cookies::{PAYLOAD_COOKIE, REFRESH_COOKIE, SIGNATURE_COOKIE};
    use crate::auth::tests::state;
    use crate::config::GrantConfig;
    use crate::test_support::{
        json_body, removed_cookie_names, request_cookies, serve, set_cookie_names,
    };
    use axum::Form;
    use axum::Json;
    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, HOST, LOCATION};
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tower::ServiceExt;

    const MOUNT: &str = "/api/auth/providers/oauth/octo";

    async fn provider_token(Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
        let token = Json(json!({ "access_token": "provider-token", "token_type": "bearer" }));
        let param = |name: &str| form.get(name).map(String::as_str);
        match param("grant_type") {
            Some("authorization_code") => {
                if param("code") == Some("good-code") && param("code_verifier").is_some() {
                    (StatusCode::OK, token)
                } else {
                    (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })))
                }
            }
            Some(grant::DEVICE_CODE_GRANT) => match param("device_code") {
                Some("approved") => (StatusCode::OK, token),
                Some("pending") => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "authorization_pending",
                        "error_description": "waiting for the user",
                    })),
                ),
                _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "expired_token" }))),
            },
            Some(grant::CLIENT_CREDENTIALS_GRANT) => {
                if param("client_id") == Some("svc") && param("client_secret") == Some("s3cret") {
                    (StatusCode::OK, token)
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_client" })))
                }
            }
            _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "unsupported_grant_type" }))),
        }
    }

    async fn provider_user(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        let authorized = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer provider-token");
        if !authorized {
            return (StatusCode::UNAUTHORIZED, Json(json!({})));
        }
        (
            StatusCode::OK,
            Json(json!({ "login": "octo", "given_name": "Octo", "email": "octo@example.com" })),
        )
    }

    async fn provider_device() -> Json<Value> {
        Json(json!({
            "device_code": "pending",
            "user_code": "WDJB-MJHT",
            "verification_url": "https://provider.example.com/device",
            "expires_in": 900,
            "interval": 5,
        }))
    }

    /// Starts a fake OAuth provider and returns its base URL.
    pub(crate) async fn fake_provider() -> String {
        serve(
            Router::new()
                .route("/token", post(provider_token))
                .route("/user", get(provider_user))
                .route("/device/code", post(provider_device)),
        )
        .await
    }

    fn config(base: &str) -> OAuthProviderConfig {
        OAuthProviderConfig {
            slug_id: "octo".to_string(),
            name: "Octo".to_string(),
            client_id: "dashgate".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: None,
            scopes: vec!["read:user".to_string()],
            disable_pkce: false,
            auth_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            user_infos_url: format!("{}/user", base),
            device_auth_url: Some(format!("{}/device/code", base)),
            device_code: None,
            client_credentials: None,
            custom_login_property: None,
        }
    }

    fn app(state: Arc<AppState>, base: &str) -> Router {
        let endpoint = Arc::new(OAuthEndpoint::new(config(base), state.cookies).expect("endpoint"));
        Router::new().nest(MOUNT, endpoint.routes()).with_state(state)
    }

    pub(crate) async fn get_with(
        app: &Router,
        uri: &str,
        mut headers: HeaderMap,
    ) -> axum::response::Response {
        headers.insert(HOST, "dash.local".parse().expect("host"));
        let mut request = Request::builder().uri(uri).body(Body::empty()).expect("request");
        *request.headers_mut() = headers;
        app.clone().oneshot(request).await.expect("response")
    }

    pub(crate) fn query_param(location: &str, name: &str) -> Option<String> {
        Url::parse(location)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string())
    }

    /// Runs `/login` and returns the handshake cookies and the `state`.
    async fn start_login(app: &Router, uri: &str) -> (HeaderMap, String) {
        let response = get_with(app, uri, HeaderMap::new()).await;
        assert!(response.status().is_redirection());
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("location")
            .to_string();
        assert!(location.contains("code_challenge="));
        assert_eq!(
            query_param(&location, "redirect_uri").as_deref(),
            Some("http://dash.local/api/auth/providers/oauth/octo/callback")
        );
        let state = query_param(&location, "state").expect("state");
        (request_cookies(response.headers()), state)
    }

    #[tokio::test]
    async fn authorization_code_flow_logs_the_user_in() {
        let base = fake_provider().await;
        let state = Arc::new(state());
        let app = app(state.clone(), &base);

        let (cookies, csrf) = start_login(&app, &format!("{}/login?redirect=/dashboards", MOUNT)).await;
        let callback = format!("{}/callback?code=good-code&state={}", MOUNT, csrf);
        let response = get_with(&app, &callback, cookies.clone()).await;

        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/dashboards")
        );
        let names = set_cookie_names(response.headers());
        for cookie in [PAYLOAD_COOKIE, SIGNATURE_COOKIE, REFRESH_COOKIE] {
            assert!(names.iter().any(|n| n == cookie), "missing {}", cookie);
        }
        let user = state.users.get("octo").await.expect("get").expect("synced");
        assert_eq!(user.first_name(), Some("Octo"));
        assert_eq!(user.oauth_providers()[0].issuer, "127.0.0.1");

        let replay = get_with(&app, &callback, cookies).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn state_mismatch_issues_nothing() {
        let base = fake_provider().await;
        let state = Arc::new(state());
        let app = app(state.clone(), &base);

        let (cookies, _) = start_login(&app, &format!("{}/login", MOUNT)).await;
        let callback = format!("{}/callback?code=good-code&state=forged", MOUNT);
        let response = get_with(&app, &callback, cookies).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie_names(response.headers()).is_empty());
        let removed = removed_cookie_names(response.headers());
        for cookie in [STATE_COOKIE, CODE_VERIFIER_COOKIE] {
            assert!(removed.iter().any(|n| n == cookie), "kept {}", cookie);
        }
        assert_eq!(json_body(response).await["message"], "unauthorized");
        assert!(state.users.get("octo").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn provider_error_clears_the_handshake() {
        let base = fake_provider().await;
        let state = Arc::new(state());
        let app = app(state.clone(), &base);

        let (cookies, csrf) =
            start_login(&app, &format!("{}/login?redirect=/dashboards", MOUNT)).await;
        let callback = format!("{}/callback?error=access_denied&state={}", MOUNT, csrf);
        let response = get_with(&app, &callback, cookies).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie_names(response.headers()).is_empty());
        let mut removed = removed_cookie_names(response.headers());
        removed.sort();
        assert_eq!(removed, vec![CODE_VERIFIER_COOKIE, REDIRECT_COOKIE, STATE_COOKIE]);
    }

    #[tokio::test]
    async fn callback_without_handshake_is_unauthorized() {
        let base = fake_provider().await;
        let app = app(Arc::new(state()), &base);
        let response = get_with(
            &app,
            &format!("{}/callback?code=good-code&state=abc", MOUNT),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejected_code_is_unauthorized() {
        let base = fake_provider().await;
        let state = Arc::new(state());
        let app = app(state.clone(), &base);

        let (cookies, csrf) = start_login(&app, &format!("{}/login", MOUNT)).await;
        let callback = format!("{}/callback?code=bad-code&state={}", MOUNT, csrf);
        let response = get_with(&app, &callback, cookies).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie_names(response.headers()).is_empty());
        let removed = removed_cookie_names(response.headers());
        assert!(removed.iter().any(|n| n == STATE_COOKIE));
        assert!(removed.iter().any(|n| n == CODE_VERIFIER_COOKIE));
    }

    #[test]
    fn only_local_redirects_are_kept() {
        assert_eq!(local_redirect(Some("/a?b=c".to_string())).as_deref(), Some("/a?b=c"));
        assert!(local_redirect(Some("//evil.example.com".to_string())).is_none());
        assert!(local_redirect(Some("https://evil.example.com".to_string())).is_none());
        assert!(local_redirect(None).is_none());
    }

    async fn post_form(app: &Router, uri: &str, body: &str) -> axum::response::Response {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request");
        app.clone().oneshot(request).await.expect("response")
    }

    #[tokio::test]
    async fn device_code_response_is_normalized() {
        let base = fake_provider().await;
        let app = app(Arc::new(state()), &base);
        let response = post_form(&app, &format!("{}/device/code", MOUNT), "").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["verification_uri"], "https://provider.example.com/device");
        assert_eq!(body["user_code"], "WDJB-MJHT");
    }

    #[tokio::test]
    async fn pending_device_code_is_relayed() {
        let base = fake_provider().await;
        let app = app(Arc::new(state()), &base);
        let response = post_form(
            &app,
            &format!("{}/token", MOUNT),
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code&device_code=pending",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "authorization_pending");
        assert_eq!(body["error_description"], "waiting for the user");
    }

    #[tokio::test]
    async fn approved_device_code_yields_tokens() {
        let base = fake_provider().await;
        let state = Arc::new(state());
        let app = app(state.clone(), &base);
        let response = post_form(
            &app,
            &format!("{}/token", MOUNT),
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code&device_code=approved",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let names = set_cookie_names(response.headers());
        for cookie in [PAYLOAD_COOKIE, SIGNATURE_COOKIE, REFRESH_COOKIE] {
            assert!(names.iter().any(|n| n == cookie), "missing {}", cookie);
        }
        let body = json_body(response).await;
        let access = body["access_token"].as_str().expect("access token");
        assert_eq!(state.tokens.verify(access).expect("verify").login(), "octo");
    }

    #[tokio::test]
    async fn client_credentials_round_trip_once() {
        let base = fake_provider().await;
        let state = Arc::new(state());
        let app = app(state.clone(), &base);

        let ok = post_form(
            &app,
            &format!("{}/token", MOUNT),
            "grant_type=client_credentials&client_id=svc&client_secret=s3cret",
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(set_cookie_names(ok.headers()).iter().any(|n| n == REFRESH_COOKIE));

        let refused = post_form(
            &app,
            &format!("{}/token", MOUNT),
            "grant_type=client_credentials&client_id=svc&client_secret=wrong",
        )
        .await;
        assert_eq!(refused.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(refused).await["error"], "invalid_client");

        let missing = post_form(
            &app,
            &format!("{}/token", MOUNT),
            "grant_type=client_credentials&client_id=svc",
        )
        .await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(missing).await["message"],
            "missing parameter 'client_secret'"
        );
    }

    #[tokio::test]
    async fn unknown_grant_is_rejected() {
        let base = fake_provider().await;
        let app = app(Arc::new(state()), &base);
        let response = post_form(&app, &format!("{}/token", MOUNT), "grant_type=password").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["message"],
            "unsupported grant type 'password'"
        );
    }

    #[tokio::test]
    async fn device_flow_uses_grant_overrides() {
        let base = fake_provider().await;
        let mut config = config(&base);
        config.device_code = Some(GrantConfig {
            client_id: Some("cli".to_string()),
            client_secret: Some(String::new()),
            scopes: vec!["repo".to_string()],
        });
        config.client_credentials = Some(GrantConfig {
            scopes: vec!["read:org".to_string()],
            ..GrantConfig::default()
        });
        let endpoint = OAuthEndpoint::new(config, state().cookies).expect("endpoint");

        let (url, client) = endpoint.device_flow().expect("configured");
        assert_eq!(url, format!("{}/device/code", base));
        assert_eq!(client.client_id, "cli");
        assert!(client.client_secret.is_empty());
        assert_eq!(client.scopes, vec!["repo"]);
        assert_eq!(endpoint.client_credentials_scopes(), vec!["read:org"]);
    }
}
