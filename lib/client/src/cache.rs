//! Get-or-refresh cache of the session tokens.

use crate::api::{ApiClient, TokenPair};
use crate::error::ClientError;
use crate::strategy::LoginStrategy;
use rootcause::prelude::Report;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Access tokens this close to expiry are refreshed before use.
pub const EXPIRY_MARGIN_SECONDS: i64 = 30;

/// Holds the current token pair and renews it on demand.
///
/// Concurrent callers share one lock, so at most one refresh or login is in
/// flight at a time.
pub struct TokenCache {
    api: Arc<ApiClient>,
    strategy: Box<dyn LoginStrategy>,
    tokens: Mutex<Option<TokenPair>>,
}

impl TokenCache {
    /// Creates an empty cache; the first call logs in.
    #[must_use]
    pub fn new(api: Arc<ApiClient>, strategy: Box<dyn LoginStrategy>) -> Self {
        Self {
            api,
            strategy,
            tokens: Mutex::new(None),
        }
    }

    /// Seeds the cache with tokens from a previous session.
    #[must_use]
    pub fn with_tokens(self, tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
            ..self
        }
    }

    /// Returns a usable access token.
    ///
    /// A token expiring within [`EXPIRY_MARGIN_SECONDS`] is refreshed; when
    /// the refresh fails the strategy logs in again.
    ///
    /// # Errors
    ///
    /// Returns the login error if both refresh and login fail.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<String, Report<ClientError>> {
        let mut tokens = self.tokens.lock().await;

        if let Some(current) = tokens.as_ref() {
            if !current.expires_within(chrono::Duration::seconds(EXPIRY_MARGIN_SECONDS)) {
                return Ok(current.access_token.clone());
            }
            match self.api.refresh(&current.refresh_token).await {
                Ok(renewed) => {
                    debug!("tokens refreshed");
                    let access = renewed.access_token.clone();
                    *tokens = Some(renewed);
                    return Ok(access);
                }
                Err(e) => debug!(error = %e.current_context(), "refresh failed, logging in again"),
            }
        }

        let fresh = self.strategy.login().await?;
        debug!("logged in");
        let access = fresh.access_token.clone();
        *tokens = Some(fresh);
        Ok(access)
    }

    /// Returns a copy of the cached pair, if any.
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.tokens.lock().await.clone()
    }

    /// Drops the cached pair so the next call logs in.
    pub async fn clear(&self) {
        *self.tokens.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{serve, token_expiring_at};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLogin {
        logins: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LoginStrategy for CountingLogin {
        async fn set_missing_input(&mut self) -> Result<(), Report<ClientError>> {
            Ok(())
        }

        async fn login(&self) -> Result<TokenPair, Report<ClientError>> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(TokenPair {
                access_token: token_expiring_at("alice", Utc::now().timestamp() + 900),
                refresh_token: "from-login".to_string(),
            })
        }
    }

    async fn refresh_server(accept: bool) -> (String, Arc<AtomicUsize>) {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        let router = Router::new().route(
            "/api/auth/refresh",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if accept {
                        (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "access_token": token_expiring_at("alice", Utc::now().timestamp() + 900),
                                "refresh_token": "from-refresh"
                            })),
                        )
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({"message": "unauthorized"})),
                        )
                    }
                }
            }),
        );
        (serve(router).await, refreshes)
    }

    fn cache(base: String, logins: Arc<AtomicUsize>) -> TokenCache {
        let api = Arc::new(ApiClient::new(base).expect("client"));
        TokenCache::new(api, Box::new(CountingLogin { logins }))
    }

    fn expiring_pair() -> TokenPair {
        TokenPair {
            access_token: token_expiring_at("alice", Utc::now().timestamp() + 5),
            refresh_token: "old".to_string(),
        }
    }

    #[tokio::test]
    async fn first_call_logs_in_and_later_calls_reuse() {
        let (base, refreshes) = refresh_server(true).await;
        let logins = Arc::new(AtomicUsize::new(0));
        let cache = cache(base, logins.clone());

        let first = cache.access_token().await.expect("token");
        let second = cache.access_token().await.expect("token");

        assert_eq!(first, second);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn nearly_expired_token_is_refreshed() {
        let (base, refreshes) = refresh_server(true).await;
        let logins = Arc::new(AtomicUsize::new(0));
        let cache = cache(base, logins.clone()).with_tokens(expiring_pair());

        cache.access_token().await.expect("token");

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(logins.load(Ordering::SeqCst), 0);
        assert_eq!(
            cache.tokens().await.map(|t| t.refresh_token),
            Some("from-refresh".to_string())
        );
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_login() {
        let (base, refreshes) = refresh_server(false).await;
        let logins = Arc::new(AtomicUsize::new(0));
        let cache = cache(base, logins.clone()).with_tokens(expiring_pair());

        cache.access_token().await.expect("token");

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.tokens().await.map(|t| t.refresh_token),
            Some("from-login".to_string())
        );
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let (base, refreshes) = refresh_server(true).await;
        let logins = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(cache(base, logins.clone()).with_tokens(expiring_pair()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.access_token().await.expect("token") })
            })
            .collect();
        for task in tasks {
            task.await.expect("join");
        }

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(logins.load(Ordering::SeqCst), 0);
    }
}
