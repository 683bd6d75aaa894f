//! Login strategies.
//!
//! Every way of obtaining a session implements [`LoginStrategy`]. The
//! strategy is picked once, by [`select_strategy`], from the options the
//! caller provided.

mod credentials;
mod device;
mod kubernetes;
mod native;

pub use credentials::ClientCredentialsLogin;
pub use device::{DeviceAuthorization, DeviceCodeLogin};
pub use kubernetes::{KubernetesLogin, SERVICE_ACCOUNT_TOKEN_PATH};
pub use native::NativeLogin;

use crate::api::{ApiClient, TokenPair};
use crate::error::ClientError;
use crate::prompt::Prompt;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::debug;

/// A way to obtain a token pair from the server.
#[async_trait]
pub trait LoginStrategy: Send + Sync {
    /// Prompts for whatever input the strategy needs and was not given.
    async fn set_missing_input(&mut self) -> Result<(), Report<ClientError>>;

    /// Performs the login.
    async fn login(&self) -> Result<TokenPair, Report<ClientError>>;
}

/// What the caller supplied on the command line or in code.
#[derive(Clone, Default)]
pub struct LoginOptions {
    pub login: Option<String>,
    pub password: Option<String>,
    /// Slug of an OAuth or OIDC provider.
    pub provider: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Log in with a Kubernetes service account token.
    pub kubernetes: bool,
    /// Token to use instead of the mounted service account token.
    pub kubernetes_token: Option<String>,
}

/// Picks the login strategy matching `options`.
///
/// - `kubernetes` selects [`KubernetesLogin`];
/// - a provider with a client id selects [`ClientCredentialsLogin`];
/// - a provider alone selects [`DeviceCodeLogin`];
/// - anything else selects [`NativeLogin`].
///
/// # Errors
///
/// Returns `ClientError::UnknownProvider` if the provider slug is not
/// configured on the server.
pub async fn select_strategy(
    options: LoginOptions,
    api: Arc<ApiClient>,
    prompt: Arc<dyn Prompt>,
) -> Result<Box<dyn LoginStrategy>, Report<ClientError>> {
    if options.kubernetes {
        debug!("kubernetes login selected");
        return Ok(Box::new(KubernetesLogin::new(api, options.kubernetes_token)));
    }

    let Some(slug) = options.provider else {
        debug!("native login selected");
        return Ok(Box::new(NativeLogin::new(
            api,
            prompt,
            options.login,
            options.password,
        )));
    };

    let provider = api
        .providers()
        .await?
        .find(&slug)
        .ok_or(ClientError::UnknownProvider { slug })?;

    match options.client_id {
        Some(client_id) => {
            debug!(provider = %provider.slug, "client credentials login selected");
            Ok(Box::new(ClientCredentialsLogin::new(
                api,
                prompt,
                provider,
                client_id,
                options.client_secret,
            )))
        }
        None => {
            debug!(provider = %provider.slug, "device code login selected");
            Ok(Box::new(DeviceCodeLogin::new(api, prompt, provider)))
        }
    }
}
