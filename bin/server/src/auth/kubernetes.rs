//! Kubernetes service account login.
//!
//! Workloads present their projected service account token; the API server
//! vouches for it through a `TokenReview`. The reviewed username becomes
//! the login and no provider binding is recorded.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::post;
use axum::{Extension, Json, Router};
use axum_extra::extract::CookieJar;
use dashgate_identity::{ExternalIdentity, TokenPair};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::AppState;
use super::provider::{ProviderEndpoint, ProviderKind};
use crate::config::KubernetesConfig;
use crate::error::{ApiError, ProviderError, StartupError};

const TOKEN_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";

/// Delegates token checks to the Kubernetes API server.
pub struct KubernetesEndpoint {
    review_url: String,
    token_file: PathBuf,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenReview {
    #[serde(default)]
    status: TokenReviewStatus,
}

#[derive(Debug, Default, Deserialize)]
struct TokenReviewStatus {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    user: Option<ReviewedUser>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewedUser {
    #[serde(default)]
    username: String,
}

fn upstream(details: impl std::fmt::Display) -> Report<ProviderError> {
    ProviderError::Upstream {
        details: details.to_string(),
    }
    .into()
}

impl KubernetesEndpoint {
    /// Creates the endpoint, trusting `ca_file` when configured.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Provider` if the CA bundle cannot be loaded or
    /// the HTTP client cannot be built.
    pub async fn new(
        config: &KubernetesConfig,
        timeout_seconds: u64,
    ) -> Result<Self, Report<StartupError>> {
        let failure = |details: String| StartupError::Provider {
            name: "kubernetes".to_string(),
            details,
        };
        let timeout = Duration::from_secs(timeout_seconds);
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(ca_file) = &config.ca_file {
            let pem = tokio::fs::read(ca_file)
                .await
                .map_err(|e| failure(format!("{}: {}", ca_file.display(), e)))?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| failure(format!("invalid CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder
            .build()
            .map_err(|e| failure(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            review_url: format!(
                "{}{}",
                config.api_server.trim_end_matches('/'),
                TOKEN_REVIEW_PATH
            ),
            token_file: config.token_file.clone(),
            http,
        })
    }

    /// Asks the API server who `token` belongs to.
    ///
    /// The server's own token is read on every call since kubelet rotates
    /// it.
    #[instrument(skip_all)]
    async fn review(&self, token: &str) -> Result<ExternalIdentity, Report<ProviderError>> {
        let own_token = tokio::fs::read_to_string(&self.token_file)
            .await
            .map_err(|e| upstream(format!("{}: {}", self.token_file.display(), e)))?;
        let review = json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "spec": { "token": token },
        });
        let response = self
            .http
            .post(&self.review_url)
            .bearer_auth(own_token.trim())
            .json(&review)
            .send()
            .await
            .map_err(upstream)?;
        let status = response.status();
        if !status.is_success() {
            return Err(upstream(format!("token review answered {}", status)));
        }
        let review: TokenReview = response.json().await.map_err(upstream)?;

        let username = review
            .status
            .user
            .map(|user| user.username)
            .filter(|name| !name.is_empty());
        match username {
            Some(username) if review.status.authenticated => {
                debug!(%username, "service account token accepted");
                Ok(ExternalIdentity::new(username))
            }
            _ => Err(ProviderError::Rejected {
                details: review
                    .status
                    .error
                    .unwrap_or_else(|| "token is not authenticated".to_string()),
            }
            .into()),
        }
    }
}

impl ProviderEndpoint for KubernetesEndpoint {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kubernetes
    }

    fn slug(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> &str {
        "kubernetes"
    }

    fn routes(self: Arc<Self>) -> Router<Arc<AppState>> {
        Router::new()
            .route("/login", post(login))
            .layer(Extension(self))
    }
}

async fn login(
    State(state): State<Arc<AppState>>,
    Extension(endpoint): Extension<Arc<KubernetesEndpoint>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<TokenPair>), ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(ApiError::unauthorized)?;

    let identity = endpoint.review(token).await?;
    let (jar, pair) = state.login_external(jar, &identity).await?;
    Ok((jar, Json(pair)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::state;
    use crate::auth::cookies::{PAYLOAD_COOKIE, REFRESH_COOKIE, SIGNATURE_COOKIE};
    use crate::test_support::{json_body, serve, set_cookie_names};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    /// Fake API server accepting `good-token` when called with `sa-token`.
    async fn api_server() -> String {
        let review = |headers: HeaderMap, Json(body): Json<Value>| async move {
            let caller_ok = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == "Bearer sa-token");
            if !caller_ok {
                return (StatusCode::FORBIDDEN, Json(json!({})));
            }
            let status = if body["spec"]["token"] == "good-token" {
                json!({
                    "authenticated": true,
                    "user": { "username": "system:serviceaccount:ci:deployer" },
                })
            } else {
                json!({ "authenticated": false, "error": "invalid bearer token" })
            };
            (StatusCode::CREATED, Json(json!({ "status": status })))
        };
        serve(Router::new().route(TOKEN_REVIEW_PATH, post(review))).await
    }

    async fn app(state: Arc<AppState>, dir: &tempfile::TempDir) -> Router {
        let token_file = dir.path().join("token");
        std::fs::write(&token_file, "sa-token\n").expect("write token");
        let config = KubernetesConfig {
            enable: true,
            api_server: api_server().await,
            token_file,
            ca_file: None,
        };
        let endpoint = Arc::new(KubernetesEndpoint::new(&config, 5).await.expect("endpoint"));
        Router::new()
            .nest("/api/auth/providers/kubernetes", endpoint.routes())
            .with_state(state)
    }

    async fn login_with(app: Router, authorization: Option<&str>) -> axum::response::Response {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/auth/providers/kubernetes/login");
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        app.oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    #[tokio::test]
    async fn reviewed_token_logs_in_without_binding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = Arc::new(state());
        let app = app(state.clone(), &dir).await;

        let response = login_with(app, Some("Bearer good-token")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let names = set_cookie_names(response.headers());
        for cookie in [PAYLOAD_COOKIE, SIGNATURE_COOKIE, REFRESH_COOKIE] {
            assert!(names.iter().any(|n| n == cookie), "missing {}", cookie);
        }
        let body = json_body(response).await;
        let access = body["access_token"].as_str().expect("access token");
        let login = "system:serviceaccount:ci:deployer";
        assert_eq!(state.tokens.verify(access).expect("verify").login(), login);

        let user = state.users.get(login).await.expect("get").expect("synced");
        assert!(user.oauth_providers().is_empty());
    }

    #[tokio::test]
    async fn unauthenticated_review_is_unauthorized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(Arc::new(state()), &dir).await;
        let response = login_with(app, Some("Bearer bad-token")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthorized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(Arc::new(state()), &dir).await;
        let response = login_with(app, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
