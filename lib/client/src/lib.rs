//! Client side of dashgate authentication.
//!
//! A command-line tool or service picks a [`LoginStrategy`] with
//! [`select_strategy`], fills in missing input through a [`Prompt`], and
//! then keeps its session alive with a [`TokenCache`]:
//!
//! ```no_run
//! use dashgate_client::{ApiClient, LoginOptions, StdinPrompt, TokenCache, select_strategy};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), rootcause::prelude::Report<dashgate_client::ClientError>> {
//! let api = Arc::new(ApiClient::new("https://dashboards.example.com")?);
//! let options = LoginOptions {
//!     login: Some("alice".to_string()),
//!     ..LoginOptions::default()
//! };
//! let mut strategy = select_strategy(options, api.clone(), Arc::new(StdinPrompt)).await?;
//! strategy.set_missing_input().await?;
//!
//! let cache = TokenCache::new(api, strategy);
//! let token = cache.access_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

mod api;
mod cache;
mod error;
mod prompt;
mod strategy;

pub use api::{ApiClient, ProviderKind, ProviderRef, ProviderSummary, Providers, TokenPair};
pub use cache::{EXPIRY_MARGIN_SECONDS, TokenCache};
pub use error::ClientError;
pub use prompt::{Prompt, StdinPrompt};
pub use strategy::{
    ClientCredentialsLogin, DeviceAuthorization, DeviceCodeLogin, KubernetesLogin, LoginOptions,
    LoginStrategy, NativeLogin, SERVICE_ACCOUNT_TOKEN_PATH, select_strategy,
};
