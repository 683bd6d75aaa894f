//! Login/password endpoint.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use dashgate_identity::TokenPair;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use super::AppState;
use super::provider::{ProviderEndpoint, ProviderKind};
use crate::error::ApiError;

/// Native accounts stored in the user store.
#[derive(Debug, Default)]
pub struct NativeEndpoint;

impl NativeEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProviderEndpoint for NativeEndpoint {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Native
    }

    fn slug(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> &str {
        "native"
    }

    fn routes(self: Arc<Self>) -> Router<Arc<AppState>> {
        Router::new().route("/login", post(login))
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
}

#[instrument(skip_all, fields(login = %body.login))]
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<TokenPair>), ApiError> {
    let user = state.native.authenticate(&body.login, &body.password).await?;
    let (jar, pair) = state.issue_session(jar, user.login())?;
    Ok((jar, Json(pair)))
}
