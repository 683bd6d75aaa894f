//! Session cookies.
//!
//! The access token is split in two cookies: `jwtPayload` holds
//! `header.payload` and `jwtSignature` the signature. The refresh token
//! travels alone in `jwtRefreshToken`.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use dashgate_identity::{SplitToken, TokenPair};
use time::Duration as TimeDuration;

pub const PAYLOAD_COOKIE: &str = "jwtPayload";
pub const SIGNATURE_COOKIE: &str = "jwtSignature";
pub const REFRESH_COOKIE: &str = "jwtRefreshToken";

/// Attributes shared by every cookie the server sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookieSettings {
    /// Builds an HttpOnly cookie on `/` with these attributes.
    #[must_use]
    pub fn build(
        &self,
        name: &'static str,
        value: impl Into<String>,
        max_age: TimeDuration,
    ) -> Cookie<'static> {
        Cookie::build((name, value.into()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(max_age)
            .build()
    }
}

fn to_time(ttl: chrono::Duration) -> TimeDuration {
    TimeDuration::seconds(ttl.num_seconds())
}

/// Adds the session cookies of `pair` to `jar`.
///
/// Returns `None` if the access token is not a compact JWT.
#[must_use]
pub fn set_session(
    jar: CookieJar,
    pair: &TokenPair,
    settings: &CookieSettings,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
) -> Option<CookieJar> {
    let split = SplitToken::split(&pair.access_token)?;
    Some(
        jar.add(settings.build(PAYLOAD_COOKIE, split.payload, to_time(access_ttl)))
            .add(settings.build(SIGNATURE_COOKIE, split.signature, to_time(access_ttl)))
            .add(settings.build(
                REFRESH_COOKIE,
                pair.refresh_token.clone(),
                to_time(refresh_ttl),
            )),
    )
}

/// Expires every session cookie.
#[must_use]
pub fn clear_session(jar: CookieJar) -> CookieJar {
    [PAYLOAD_COOKIE, SIGNATURE_COOKIE, REFRESH_COOKIE]
        .into_iter()
        .fold(jar, |jar, name| {
            jar.add(
                Cookie::build((name, ""))
                    .path("/")
                    .max_age(TimeDuration::ZERO),
            )
        })
}

/// Rebuilds the compact access token from the split cookies.
#[must_use]
pub fn access_token(jar: &CookieJar) -> Option<String> {
    let payload = jar.get(PAYLOAD_COOKIE)?.value().to_string();
    let signature = jar.get(SIGNATURE_COOKIE)?.value().to_string();
    if payload.is_empty() || signature.is_empty() {
        return None;
    }
    Some(SplitToken { payload, signature }.join())
}

/// Returns the refresh token cookie, if present.
#[must_use]
pub fn refresh_token(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
