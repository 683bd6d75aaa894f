//! Users, session tokens and external identities for dashgate.
//!
//! This crate provides:
//! - The `User` record and its provider bindings
//! - The token service (`TokenService`): HS512 access/refresh tokens,
//!   refresh rotation and the split-cookie codec
//! - Native password accounts (`NativeAccounts`)
//! - User-info strategies normalizing provider payloads
//! - User synchronization (`UserSync`) guarding against account takeover
//! - Storage seams (`UserStore`, `RefreshTokenLedger`) with in-memory
//!   implementations
//!
//! # Example
//!
//! ```
//! use dashgate_identity::{MemoryRefreshTokenLedger, SplitToken, TokenService};
//! use std::sync::Arc;
//!
//! let tokens = TokenService::new(
//!     b"0123456789abcdef0123456789abcdef",
//!     Arc::new(MemoryRefreshTokenLedger::new()),
//! );
//! let access = tokens.issue_access("alice").expect("sign");
//!
//! // The access token travels as two cookies.
//! let split = SplitToken::split(&access).expect("compact JWT");
//! let claims = tokens.verify(&split.join()).expect("verify");
//! assert_eq!(claims.login(), "alice");
//! ```

pub mod error;
pub mod native;
pub mod password;
pub mod store;
pub mod sync;
pub mod token;
pub mod user;
pub mod userinfo;

// Re-export main types at crate root
pub use error::{LoginError, StoreError, SyncError, TokenError, UserInfoError};
pub use native::{NativeAccounts, NewNativeUser};
pub use password::{hash_password, verify_password};
pub use store::{MemoryRefreshTokenLedger, MemoryUserStore, RefreshTokenLedger, UserStore};
pub use sync::UserSync;
pub use token::{Claims, SplitToken, TokenPair, TokenService};
pub use user::{ProviderBinding, PublicUser, User};
pub use userinfo::{
    ExternalIdentity, OAuthUserInfo, OidcUserInfo, UserInfoStrategy, login_from_email,
};
