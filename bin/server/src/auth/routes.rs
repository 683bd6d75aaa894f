//! Session routes: refresh, logout and the provider listing.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use dashgate_identity::TokenPair;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::AppState;
use super::cookies;
use super::provider::{PROVIDERS_PATH, ProviderListing};
use crate::error::ApiError;

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

/// Routes that do not belong to a single provider.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(REFRESH_PATH, post(refresh))
        .route(LOGOUT_PATH, get(logout))
        .route(PROVIDERS_PATH, get(providers))
}

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Picks the refresh token from the cookie, then from a JSON body.
fn refresh_token_of(jar: &CookieJar, body: &[u8]) -> Result<String, ApiError> {
    if let Some(token) = cookies::refresh_token(jar) {
        return Ok(token);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request("missing refresh token"));
    }
    let request: RefreshRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;
    request
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing refresh token"))
}

/// Exchanges a refresh token for a new pair; each token works once.
#[instrument(skip_all)]
async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<TokenPair>), ApiError> {
    let token = refresh_token_of(&jar, &body)?;
    let pair = state.tokens.refresh(&token).await?;
    let jar = cookies::set_session(
        jar,
        &pair,
        &state.cookies,
        state.tokens.access_ttl(),
        state.tokens.refresh_ttl(),
    )
    .ok_or_else(|| ApiError::internal("issued access token is not a compact JWT"))?;
    Ok((jar, Json(pair)))
}

/// Spends the refresh token, clears the session cookies and goes home.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(token) = cookies::refresh_token(&jar) {
        if let Err(e) = state.tokens.revoke_refresh(&token).await {
            debug!(error = %e.current_context(), "refresh token was not revoked");
        }
    }
    (cookies::clear_session(jar), Redirect::to("/"))
}

async fn providers(State(state): State<Arc<AppState>>) -> Json<ProviderListing> {
    Json(state.providers.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::state;
    use crate::test_support::{json_body, request_cookies, set_cookie_names};
    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
    use axum::http::{HeaderMap, Request, StatusCode};
    use axum::response::Response;
    use serde_json::json;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        routes().with_state(state)
    }

    async fn post_refresh(state: &Arc<AppState>, headers: HeaderMap, body: Body) -> Response {
        let mut request = Request::builder().method("POST").uri(REFRESH_PATH);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        app(state.clone())
            .oneshot(request.body(body).expect("request"))
            .await
            .expect("response")
    }

    fn json_refresh(token: &str) -> (HeaderMap, Body) {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().expect("header"));
        let body = Body::from(json!({ "refresh_token": token }).to_string());
        (headers, body)
    }

    #[tokio::test]
    async fn refresh_from_body_rotates_once() {
        let state = Arc::new(state());
        let pair = state.tokens.issue_pair("alice").expect("issue");

        let (headers, body) = json_refresh(&pair.refresh_token);
        let response = post_refresh(&state, headers, body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let names = set_cookie_names(response.headers());
        assert!(names.contains(&cookies::PAYLOAD_COOKIE.to_string()));
        assert!(names.contains(&cookies::REFRESH_COOKIE.to_string()));
        let rotated = json_body(response).await;
        let access = rotated["access_token"].as_str().expect("access token");
        assert_eq!(state.tokens.verify(access).expect("verify").login(), "alice");

        let (headers, body) = json_refresh(&pair.refresh_token);
        let response = post_refresh(&state, headers, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_from_cookie() {
        let state = Arc::new(state());
        let (jar, _) = state
            .issue_session(CookieJar::new(), "alice")
            .expect("issue");
        let mut set = HeaderMap::new();
        for cookie in jar.iter() {
            set.append(SET_COOKIE, cookie.to_string().parse().expect("header"));
        }

        let response = post_refresh(&state, request_cookies(&set), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_a_bad_request() {
        let state = Arc::new(state());
        let response = post_refresh(&state, HeaderMap::new(), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (headers, body) = json_refresh("");
        let response = post_refresh(&state, headers, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() {
        let state = Arc::new(state());
        let pair = state.tokens.issue_pair("alice").expect("issue");
        let (headers, body) = json_refresh(&pair.access_token);
        let response = post_refresh(&state, headers, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_revokes_and_clears() {
        let state = Arc::new(state());
        let pair = state.tokens.issue_pair("alice").expect("issue");
        let request = Request::builder()
            .uri(LOGOUT_PATH)
            .header(
                axum::http::header::COOKIE,
                format!("{}={}", cookies::REFRESH_COOKIE, pair.refresh_token),
            )
            .body(Body::empty())
            .expect("request");
        let response = app(state.clone()).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/");
        assert!(set_cookie_names(response.headers()).is_empty());
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 3);

        let err = state
            .tokens
            .refresh(&pair.refresh_token)
            .await
            .expect_err("revoked");
        assert_eq!(
            err.current_context().kind(),
            dashgate_core::ErrorKind::Unauthorized
        );
    }

    #[tokio::test]
    async fn logout_without_session_still_redirects() {
        let request = Request::builder()
            .uri(LOGOUT_PATH)
            .body(Body::empty())
            .expect("request");
        let response = app(Arc::new(state())).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn providers_are_listed() {
        let request = Request::builder()
            .uri(PROVIDERS_PATH)
            .body(Body::empty())
            .expect("request");
        let response = app(Arc::new(state())).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["native"], false);
    }
}
