//! Authentication middleware and the caller extractor.
//!
//! Browsers carry the access token in the split session cookies; API
//! clients send `Authorization: Bearer`. When the header is absent the
//! cookies are merged back into it, so downstream layers only ever see the
//! header.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tracing::debug;

use super::AppState;
use super::cookies;
use crate::error::ApiError;

/// The principal of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub login: String,
    pub anonymous: bool,
}

impl Caller {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            login: String::new(),
            anonymous: true,
        }
    }

    #[must_use]
    pub fn user(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            anonymous: false,
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Copies the cookie token into `Authorization` when the header is absent.
fn merge_cookie_token(headers: &mut HeaderMap) {
    if headers.contains_key(AUTHORIZATION) {
        return;
    }
    let jar = CookieJar::from_headers(headers);
    let Some(token) = cookies::access_token(&jar) else {
        return;
    };
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
        headers.insert(AUTHORIZATION, value);
    }
}

/// Resolves the caller, `None` meaning the token is missing or invalid.
fn resolve(state: &AppState, headers: &mut HeaderMap) -> Option<Caller> {
    if !state.enable_auth {
        return Some(Caller::anonymous());
    }
    merge_cookie_token(headers);
    let token = bearer(headers)?;
    match state.tokens.verify(&token) {
        Ok(claims) => Some(Caller::user(claims.login())),
        Err(_) => {
            debug!("rejected access token");
            None
        }
    }
}

/// Rejects requests without a valid access token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve(&state, request.headers_mut()) {
        Some(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        None => ApiError::unauthorized().into_response(),
    }
}

/// Lets requests without a valid access token through as anonymous.
pub async fn allow_anonymous(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = resolve(&state, request.headers_mut()).unwrap_or_else(Caller::anonymous);
    request.extensions_mut().insert(caller);
    next.run(request).await
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(ApiError::unauthorized)
    }
}
