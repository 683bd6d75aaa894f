//! One-shot handshake values kept in encrypted cookies.
//!
//! Login endpoints park `state`, `nonce` and the PKCE verifier in private
//! cookies between the redirect to the provider and the callback. Cookies
//! are encrypted and authenticated with a key generated when the endpoint
//! is built; it is never persisted, so a restart invalidates pending logins.
//!
//! Reading a value consumes it. The cookie is removed from the jar and the
//! value is remembered until its cookie would have expired, so presenting
//! the same cookie again fails. A failed callback clears every handshake
//! cookie through [`CallbackError`].

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar};
use rootcause::prelude::Report;
use std::collections::HashMap;
use time::Duration as TimeDuration;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::cookies::CookieSettings;
use crate::error::{ApiError, StateError};

pub const STATE_COOKIE: &str = "state";
pub const CODE_VERIFIER_COOKIE: &str = "code_verifier";
pub const NONCE_COOKIE: &str = "nonce";
pub const REDIRECT_COOKIE: &str = "redirect";

const HANDSHAKE_COOKIES: [&str; 4] = [
    STATE_COOKIE,
    CODE_VERIFIER_COOKIE,
    NONCE_COOKIE,
    REDIRECT_COOKIE,
];

/// Lifetime of a handshake value.
pub const STATE_TTL_MINUTES: i64 = 10;

const STATE_TTL: Duration = Duration::from_secs(STATE_TTL_MINUTES as u64 * 60);

/// Encrypted cookie storage for handshake values.
pub struct StateStore {
    key: Key,
    settings: CookieSettings,
    consumed: Mutex<HashMap<String, Instant>>,
}

impl StateStore {
    /// Creates a store with a fresh random key.
    #[must_use]
    pub fn new(settings: CookieSettings) -> Self {
        Self {
            key: Key::generate(),
            settings,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the private jar of this store over the request cookies.
    #[must_use]
    pub fn jar(&self, headers: &HeaderMap) -> PrivateCookieJar {
        PrivateCookieJar::from_headers(headers, self.key.clone())
    }

    /// Stores `value` under `name`.
    #[must_use]
    pub fn save(
        &self,
        jar: PrivateCookieJar,
        name: &'static str,
        value: impl Into<String>,
    ) -> PrivateCookieJar {
        jar.add(
            self.settings
                .build(name, value, TimeDuration::minutes(STATE_TTL_MINUTES)),
        )
    }

    /// Removes the value stored under `name` without replay tracking.
    ///
    /// For non-secret values such as the post-login redirect target.
    #[must_use]
    pub fn take(
        &self,
        jar: PrivateCookieJar,
        name: &'static str,
    ) -> (PrivateCookieJar, Option<String>) {
        let value = jar
            .get(name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        match value {
            Some(value) => (jar.remove(Cookie::build(name).path("/")), Some(value)),
            None => (jar, None),
        }
    }

    /// Takes the value stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Missing` if the cookie is absent or was not
    /// encrypted with this store's key, and `StateError::Replayed` if the
    /// value was already taken.
    pub async fn read(
        &self,
        jar: PrivateCookieJar,
        name: &'static str,
    ) -> Result<(PrivateCookieJar, String), Report<StateError>> {
        let (jar, value) = self.take(jar, name);
        let value = value.ok_or(StateError::Missing { name })?;

        let now = Instant::now();
        let mut consumed = self.consumed.lock().await;
        consumed.retain(|_, expires| *expires > now);
        if consumed.contains_key(&ledger_key(name, &value)) {
            debug!(name, "handshake value replayed");
            return Err(StateError::Replayed { name }.into());
        }
        consumed.insert(ledger_key(name, &value), now + STATE_TTL);
        Ok((jar, value))
    }

    /// Like [`StateStore::read`], and checks the value equals `presented`.
    ///
    /// The value is consumed even when the comparison fails.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Mismatch` if the values differ or `presented` is
    /// `None`, plus the errors of [`StateStore::read`].
    pub async fn read_and_compare(
        &self,
        jar: PrivateCookieJar,
        name: &'static str,
        presented: Option<&str>,
    ) -> Result<PrivateCookieJar, Report<StateError>> {
        let (jar, value) = self.read(jar, name).await?;
        if presented != Some(value.as_str()) {
            debug!(name, "handshake value mismatch");
            return Err(StateError::Mismatch { name }.into());
        }
        Ok(jar)
    }

    /// Removes every handshake cookie the request carried.
    #[must_use]
    pub fn discard(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        HANDSHAKE_COOKIES
            .into_iter()
            .fold(jar, |jar, name| jar.remove(Cookie::build(name).path("/")))
    }

    /// Turns a callback failure into an answer that also clears the
    /// handshake cookies of the request.
    #[must_use]
    pub fn abort(&self, headers: &HeaderMap, error: ApiError) -> CallbackError {
        CallbackError {
            jar: self.discard(self.jar(headers)),
            error,
        }
    }
}

/// Error of a login callback.
#[derive(Debug)]
pub struct CallbackError {
    jar: PrivateCookieJar,
    error: ApiError,
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        (self.jar, self.error).into_response()
    }
}

fn ledger_key(name: &str, value: &str) -> String {
    format!("{}:{}", name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{removed_cookie_names, request_cookies};
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;
    use axum::response::IntoResponse;
    use axum_extra::extract::cookie::SameSite;

    fn settings() -> CookieSettings {
        CookieSettings {
            secure: false,
            same_site: SameSite::Lax,
        }
    }

    fn saved(store: &StateStore, name: &'static str, value: &str) -> HeaderMap {
        let jar = store.save(store.jar(&HeaderMap::new()), name, value);
        request_cookies(jar.into_response().headers())
    }

    #[tokio::test]
    async fn saved_value_reads_back_once() {
        let store = StateStore::new(settings());
        let headers = saved(&store, STATE_COOKIE, "abc");

        let (jar, value) = store
            .read(store.jar(&headers), STATE_COOKIE)
            .await
            .expect("first read");
        assert_eq!(value, "abc");
        assert!(jar.get(STATE_COOKIE).is_none());

        let err = store
            .read(store.jar(&headers), STATE_COOKIE)
            .await
            .expect_err("replay");
        assert_eq!(
            *err.current_context(),
            StateError::Replayed { name: STATE_COOKIE }
        );
    }

    #[tokio::test]
    async fn mismatch_is_rejected_and_consumes() {
        let store = StateStore::new(settings());
        let headers = saved(&store, STATE_COOKIE, "abc");

        let err = store
            .read_and_compare(store.jar(&headers), STATE_COOKIE, Some("xyz"))
            .await
            .expect_err("mismatch");
        assert_eq!(
            *err.current_context(),
            StateError::Mismatch { name: STATE_COOKIE }
        );

        let err = store
            .read_and_compare(store.jar(&headers), STATE_COOKIE, Some("abc"))
            .await
            .expect_err("already consumed");
        assert_eq!(
            *err.current_context(),
            StateError::Replayed { name: STATE_COOKIE }
        );
    }

    #[tokio::test]
    async fn matching_value_is_accepted() {
        let store = StateStore::new(settings());
        let headers = saved(&store, STATE_COOKIE, "abc");
        store
            .read_and_compare(store.jar(&headers), STATE_COOKIE, Some("abc"))
            .await
            .expect("match");
    }

    #[tokio::test]
    async fn taken_values_are_not_tracked() {
        let store = StateStore::new(settings());
        let headers = saved(&store, REDIRECT_COOKIE, "/dashboards");
        for _ in 0..2 {
            let (_, value) = store.take(store.jar(&headers), REDIRECT_COOKIE);
            assert_eq!(value.as_deref(), Some("/dashboards"));
        }
        let (_, value) = store.take(store.jar(&HeaderMap::new()), REDIRECT_COOKIE);
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn cookies_of_another_store_are_unreadable() {
        let first = StateStore::new(settings());
        let second = StateStore::new(settings());
        let headers = saved(&first, STATE_COOKIE, "abc");

        let err = second
            .read(second.jar(&headers), STATE_COOKIE)
            .await
            .expect_err("foreign key");
        assert_eq!(
            *err.current_context(),
            StateError::Missing { name: STATE_COOKIE }
        );
    }

    #[tokio::test]
    async fn tampered_cookie_is_missing() {
        let store = StateStore::new(settings());
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("state=not-encrypted"));
        let err = store
            .read(store.jar(&headers), STATE_COOKIE)
            .await
            .expect_err("plain cookie");
        assert_eq!(
            *err.current_context(),
            StateError::Missing { name: STATE_COOKIE }
        );
    }

    #[tokio::test]
    async fn abort_clears_every_handshake_cookie() {
        let store = StateStore::new(settings());
        let jar = store.save(store.jar(&HeaderMap::new()), STATE_COOKIE, "abc");
        let jar = store.save(jar, CODE_VERIFIER_COOKIE, "verifier");
        let jar = store.save(jar, NONCE_COOKIE, "nonce");
        let headers = request_cookies(jar.into_response().headers());

        let response = store
            .abort(&headers, ApiError::unauthorized())
            .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
        let mut removed = removed_cookie_names(response.headers());
        removed.sort();
        assert_eq!(removed, vec![CODE_VERIFIER_COOKIE, NONCE_COOKIE, STATE_COOKIE]);
    }
}
