//! Session token issuance, verification and rotation.
//!
//! Access and refresh tokens are HS512 JWTs carrying the login as subject.
//! They are signed with distinct keys derived from one server secret, so a
//! refresh token never verifies as an access token and vice versa.
//!
//! Every verification failure is reported as [`TokenError::Unauthorized`];
//! the precise reason only reaches debug logs.

use crate::error::TokenError;
use crate::store::RefreshTokenLedger;
use chrono::{DateTime, Duration, Utc};
use dashgate_core::RefreshTokenId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

const ALGORITHM: Algorithm = Algorithm::HS512;
const REFRESH_KEY_SUFFIX: &[u8] = b"-refresh";

/// Default lifetime of an access token.
pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
/// Default lifetime of a refresh token.
pub const DEFAULT_REFRESH_TTL_MINUTES: i64 = 24 * 60;

/// Claims carried by both token types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The login of the user the token was issued to.
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Present on refresh tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    /// Returns the login the token was issued to.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.sub
    }

    /// Returns the expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// An access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// A compact JWT cut in two at its second `.`.
///
/// `payload` holds `header.payload`, which scripts may read; `signature`
/// holds the part that makes the token verifiable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitToken {
    pub payload: String,
    pub signature: String,
}

impl SplitToken {
    /// Splits a compact JWT.
    ///
    /// Returns `None` unless the input has exactly three non-empty segments.
    #[must_use]
    pub fn split(compact: &str) -> Option<Self> {
        let (payload, signature) = compact.rsplit_once('.')?;
        let (header, body) = payload.split_once('.')?;
        if header.is_empty() || body.is_empty() || signature.is_empty() || body.contains('.') {
            return None;
        }
        Some(Self {
            payload: payload.to_string(),
            signature: signature.to_string(),
        })
    }

    /// Rebuilds the compact JWT.
    #[must_use]
    pub fn join(&self) -> String {
        format!("{}.{}", self.payload, self.signature)
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Issues and verifies session tokens.
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    ledger: Arc<dyn RefreshTokenLedger>,
}

impl TokenService {
    /// Creates a token service with the default lifetimes.
    ///
    /// The refresh key is the secret followed by `-refresh`.
    #[must_use]
    pub fn new(secret: &[u8], ledger: Arc<dyn RefreshTokenLedger>) -> Self {
        let refresh_secret = [secret, REFRESH_KEY_SUFFIX].concat();
        Self {
            access: SigningKeys::from_secret(secret),
            refresh: SigningKeys::from_secret(&refresh_secret),
            access_ttl: Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
            refresh_ttl: Duration::minutes(DEFAULT_REFRESH_TTL_MINUTES),
            ledger,
        }
    }

    /// Sets the access token lifetime.
    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Sets the refresh token lifetime.
    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Returns the refresh token lifetime.
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issues a short-lived access token for `login`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if the JWT cannot be encoded.
    #[instrument(skip(self))]
    pub fn issue_access(&self, login: &str) -> Result<String, Report<TokenError>> {
        let claims = self.claims(login, self.access_ttl, None);
        sign(&claims, &self.access.encoding)
    }

    /// Issues a refresh token for `login`, identified by a fresh `jti`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if the JWT cannot be encoded.
    #[instrument(skip(self))]
    pub fn issue_refresh(&self, login: &str) -> Result<String, Report<TokenError>> {
        let jti = RefreshTokenId::new().to_string();
        let claims = self.claims(login, self.refresh_ttl, Some(jti));
        sign(&claims, &self.refresh.encoding)
    }

    /// Issues an access and a refresh token for `login`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if either JWT cannot be encoded.
    pub fn issue_pair(&self, login: &str) -> Result<TokenPair, Report<TokenError>> {
        Ok(TokenPair {
            access_token: self.issue_access(login)?,
            refresh_token: self.issue_refresh(login)?,
        })
    }

    /// Verifies an access token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Unauthorized` for any invalid token.
    pub fn verify(&self, token: &str) -> Result<Claims, Report<TokenError>> {
        check(token, &self.access.decoding)
    }

    /// Exchanges a refresh token for a new pair.
    ///
    /// The presented token is spent: presenting it again fails even though
    /// its signature is still valid.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Unauthorized` if the token is invalid, expired or
    /// already spent, and `TokenError::Ledger` if the ledger fails.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Report<TokenError>> {
        let claims = self.spend_refresh(refresh_token).await?;
        debug!(login = %claims.sub, "rotating refresh token");
        self.issue_pair(&claims.sub)
    }

    /// Spends a refresh token without issuing a new pair.
    ///
    /// # Errors
    ///
    /// Same as [`TokenService::refresh`].
    pub async fn revoke_refresh(&self, refresh_token: &str) -> Result<(), Report<TokenError>> {
        self.spend_refresh(refresh_token).await.map(|_| ())
    }

    async fn spend_refresh(&self, refresh_token: &str) -> Result<Claims, Report<TokenError>> {
        let claims = check(refresh_token, &self.refresh.decoding)?;
        let id = claims
            .jti
            .as_deref()
            .and_then(|jti| RefreshTokenId::from_str(jti).ok())
            .ok_or(TokenError::Unauthorized)?;

        let fresh = self
            .ledger
            .consume(id, claims.expires_at())
            .await
            .map_err(|e| TokenError::Ledger {
                details: e.to_string(),
            })?;
        if !fresh {
            debug!(login = %claims.sub, "refresh token replayed");
            return Err(TokenError::Unauthorized.into());
        }
        Ok(claims)
    }

    fn claims(&self, login: &str, ttl: Duration, jti: Option<String>) -> Claims {
        let now = Utc::now();
        Claims {
            sub: login.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti,
        }
    }
}

fn sign(claims: &Claims, key: &EncodingKey) -> Result<String, Report<TokenError>> {
    encode(&Header::new(ALGORITHM), claims, key).map_err(|e| {
        TokenError::Signing {
            details: e.to_string(),
        }
        .into()
    })
}

fn check(token: &str, key: &DecodingKey) -> Result<Claims, Report<TokenError>> {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp", "sub"]);

    match decode::<Claims>(token, key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => {
            debug!(reason = %e, "token rejected");
            Err(TokenError::Unauthorized.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRefreshTokenLedger;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service() -> TokenService {
        TokenService::new(SECRET, Arc::new(MemoryRefreshTokenLedger::new()))
    }

    fn is_unauthorized(report: &Report<TokenError>) -> bool {
        *report.current_context() == TokenError::Unauthorized
    }

    #[test]
    fn access_token_verifies_to_login() {
        let svc = service();
        let token = svc.issue_access("alice").expect("issue");
        let claims = svc.verify(&token).expect("verify");
        assert_eq!(claims.login(), "alice");
        assert!(claims.jti.is_none());
        assert_eq!(claims.exp - claims.iat, DEFAULT_ACCESS_TTL_MINUTES * 60);
    }

    #[test]
    fn split_then_join_still_verifies() {
        let svc = service();
        let token = svc.issue_access("alice").expect("issue");
        let split = SplitToken::split(&token).expect("three segments");
        assert_eq!(split.payload.matches('.').count(), 1);
        assert!(!split.signature.contains('.'));

        let rebuilt = SplitToken {
            payload: split.payload.clone(),
            signature: split.signature.clone(),
        }
        .join();
        assert_eq!(rebuilt, token);
        assert_eq!(svc.verify(&rebuilt).expect("verify").login(), "alice");
    }

    #[test]
    fn split_rejects_malformed_input() {
        assert!(SplitToken::split("no-dots").is_none());
        assert!(SplitToken::split("a.b").is_none());
        assert!(SplitToken::split("a.b.c.d").is_none());
        assert!(SplitToken::split("a..c").is_none());
        assert!(SplitToken::split("a.b.").is_none());
    }

    #[test]
    fn tampered_signature_is_unauthorized() {
        let svc = service();
        let token = svc.issue_access("alice").expect("issue");
        let mut split = SplitToken::split(&token).expect("split");
        split.signature = "AAAA".to_string();
        let err = svc.verify(&split.join()).expect_err("forged");
        assert!(is_unauthorized(&err));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let svc = service().with_access_ttl(Duration::seconds(-30));
        let token = svc.issue_access("alice").expect("issue");
        let err = svc.verify(&token).expect_err("expired");
        assert!(is_unauthorized(&err));
    }

    #[test]
    fn token_from_other_secret_is_unauthorized() {
        let other = TokenService::new(
            b"ffffffffffffffffffffffffffffffff",
            Arc::new(MemoryRefreshTokenLedger::new()),
        );
        let token = other.issue_access("mallory").expect("issue");
        assert!(is_unauthorized(&service().verify(&token).expect_err("foreign")));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = service();
        let refresh = svc.issue_refresh("alice").expect("issue");
        assert!(is_unauthorized(&svc.verify(&refresh).expect_err("wrong key")));
    }

    #[tokio::test]
    async fn refresh_rotates_once() {
        let svc = service();
        let pair = svc.issue_pair("alice").expect("issue");

        let rotated = svc.refresh(&pair.refresh_token).await.expect("first refresh");
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_eq!(
            svc.verify(&rotated.access_token).expect("verify").login(),
            "alice"
        );

        let err = svc
            .refresh(&pair.refresh_token)
            .await
            .expect_err("second use of the same refresh token");
        assert!(is_unauthorized(&err));

        svc.refresh(&rotated.refresh_token)
            .await
            .expect("rotated token still usable");
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() {
        let svc = service();
        let access = svc.issue_access("alice").expect("issue");
        assert!(is_unauthorized(&svc.refresh(&access).await.expect_err("not a refresh token")));
    }

    #[tokio::test]
    async fn revoked_refresh_token_cannot_refresh() {
        let svc = service();
        let refresh = svc.issue_refresh("alice").expect("issue");
        svc.revoke_refresh(&refresh).await.expect("revoke");
        assert!(is_unauthorized(&svc.refresh(&refresh).await.expect_err("revoked")));
    }
}
