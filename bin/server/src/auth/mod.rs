//! Authentication and authorization for the dashgate server.
//!
//! This module provides:
//! - Identity provider endpoints (native, OAuth 2.0, OIDC, Kubernetes)
//!   behind the [`ProviderEndpoint`] trait
//! - Session cookies and the encrypted handshake state store
//! - The request middleware resolving the [`Caller`]
//! - Refresh, logout and provider listing routes
//!
//! Resource handlers guard themselves with [`AppState::check_permission`].

pub mod cookies;
pub mod grant;
pub mod kubernetes;
pub mod middleware;
pub mod native;
pub mod oauth;
pub mod oidc;
pub mod provider;
pub mod routes;
pub mod state_store;

use axum_extra::extract::CookieJar;
use dashgate_authz::{Action, RbacEngine};
use dashgate_core::Kind;
use dashgate_identity::{
    ExternalIdentity, NativeAccounts, TokenPair, TokenService, UserStore, UserSync,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use cookies::CookieSettings;

pub use middleware::{Caller, allow_anonymous, require_auth};
pub use provider::{ProviderEndpoint, ProviderKind, ProviderListing, endpoints_from_config};

/// Shared application state.
pub struct AppState {
    pub tokens: TokenService,
    pub users: Arc<dyn UserStore>,
    pub sync: UserSync,
    pub native: NativeAccounts,
    pub rbac: RbacEngine,
    pub cookies: CookieSettings,
    /// Outbound client for provider calls; redirects are not followed.
    pub http: reqwest::Client,
    /// When false every caller is anonymous and every check passes.
    pub enable_auth: bool,
    pub disable_sign_up: bool,
    pub providers: ProviderListing,
}

impl AppState {
    /// Issues a token pair for `login` and stores it in the session cookies.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the tokens cannot be signed.
    pub fn issue_session(
        &self,
        jar: CookieJar,
        login: &str,
    ) -> Result<(CookieJar, TokenPair), ApiError> {
        let pair = self.tokens.issue_pair(login)?;
        let jar = cookies::set_session(
            jar,
            &pair,
            &self.cookies,
            self.tokens.access_ttl(),
            self.tokens.refresh_ttl(),
        )
        .ok_or_else(|| ApiError::internal("issued access token is not a compact JWT"))?;
        Ok((jar, pair))
    }

    /// Synchronizes an external identity and issues its token pair.
    ///
    /// # Errors
    ///
    /// Returns the sync refusal or an internal error.
    pub async fn login_external(
        &self,
        jar: CookieJar,
        identity: &ExternalIdentity,
    ) -> Result<(CookieJar, TokenPair), ApiError> {
        let user = self.sync.sync_user(identity).await?;
        debug!(login = %user.login(), "external identity synchronized");
        self.issue_session(jar, user.login())
    }

    /// Checks that `caller` may perform `action` on `kind` in `project`.
    ///
    /// Anonymous callers only hold the guest permissions.
    ///
    /// # Errors
    ///
    /// Returns an unauthorized error on denial and an internal error if the
    /// role store fails.
    pub async fn check_permission(
        &self,
        caller: &Caller,
        action: Action,
        kind: Kind,
        project: &str,
    ) -> Result<(), ApiError> {
        if !self.enable_auth {
            return Ok(());
        }
        if caller.anonymous {
            if self.rbac.guest_allows(action, kind) {
                return Ok(());
            }
            return Err(ApiError::unauthorized());
        }
        self.rbac
            .require(&caller.login, action, kind, project)
            .await
            .map_err(ApiError::from)
    }
}
