//! Application assembly: stores, shared state and the router.

use axum::Router;
use dashgate_authz::{MemoryRbacStore, RbacEngine, RbacStore};
use dashgate_identity::{
    MemoryRefreshTokenLedger, MemoryUserStore, NativeAccounts, RefreshTokenLedger, TokenService,
    UserStore, UserSync,
};
use rand::RngCore;
use rootcause::prelude::Report;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::cookies::CookieSettings;
use crate::auth::provider::mount_path;
use crate::auth::{AppState, ProviderEndpoint, ProviderListing, endpoints_from_config, routes};
use crate::config::{ENCRYPTION_KEY_LEN, ServerConfig};
use crate::db::{PgRbacStore, PgRefreshTokenLedger, PgUserStore};
use crate::error::StartupError;
use crate::user;

/// Storage backends of the server.
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub rbac: Arc<dyn RbacStore>,
    pub refresh: Arc<dyn RefreshTokenLedger>,
}

impl Stores {
    /// Process-local stores, lost on restart.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            rbac: Arc::new(MemoryRbacStore::new()),
            refresh: Arc::new(MemoryRefreshTokenLedger::new()),
        }
    }

    /// Stores backed by PostgreSQL.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            rbac: Arc::new(PgRbacStore::new(pool.clone())),
            refresh: Arc::new(PgRefreshTokenLedger::new(pool)),
        }
    }
}

/// Mounts the provider endpoints, the session routes and the user routes.
pub fn router(state: Arc<AppState>, endpoints: &[Arc<dyn ProviderEndpoint>]) -> Router {
    let mut router = Router::new();
    for endpoint in endpoints {
        let mount = mount_path(endpoint.kind(), endpoint.slug());
        router = router.nest(&mount, endpoint.clone().routes());
    }
    router
        .merge(routes::routes())
        .merge(user::routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn signing_key(config: &ServerConfig) -> Result<Vec<u8>, Report<StartupError>> {
    if let Some(key) = config.encryption_key().map_err(StartupError::config)? {
        return Ok(key);
    }
    warn!("no encryption key configured, sessions will not survive a restart");
    let mut key = vec![0u8; ENCRYPTION_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(key)
}

/// Builds the application from its configuration.
///
/// # Errors
///
/// Returns `StartupError` if the signing key cannot be loaded or an
/// identity provider cannot be set up.
pub async fn build_app(config: &ServerConfig, stores: Stores) -> Result<Router, Report<StartupError>> {
    let security = &config.security;
    let authn = &security.authentication;

    let tokens = TokenService::new(&signing_key(config)?, stores.refresh)
        .with_access_ttl(chrono::Duration::minutes(authn.access_token_ttl_minutes))
        .with_refresh_ttl(chrono::Duration::minutes(authn.refresh_token_ttl_minutes));

    let timeout = Duration::from_secs(config.http_timeout_seconds);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| StartupError::Io {
            details: format!("failed to create HTTP client: {}", e),
        })?;

    let cookies = CookieSettings {
        secure: security.cookie.secure,
        same_site: security.cookie.same_site(),
    };
    let endpoints = endpoints_from_config(config, &http, cookies).await?;

    let state = Arc::new(AppState {
        tokens,
        users: stores.users.clone(),
        sync: UserSync::new(stores.users.clone()),
        native: NativeAccounts::new(stores.users),
        rbac: RbacEngine::new(
            stores.rbac,
            security.authorization.guest_permissions.clone(),
        ),
        cookies,
        http,
        enable_auth: security.enable_auth,
        disable_sign_up: authn.disable_sign_up,
        providers: ProviderListing::from_endpoints(&endpoints),
    });
    if !state.enable_auth {
        warn!("authentication is disabled, every request is anonymous");
    }
    info!(providers = endpoints.len(), "application assembled");
    Ok(router(state, &endpoints))
}
