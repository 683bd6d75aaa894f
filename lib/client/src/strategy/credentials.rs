use super::LoginStrategy;
use crate::api::{ApiClient, ProviderRef, TokenPair};
use crate::error::ClientError;
use crate::prompt::Prompt;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::Arc;

/// OAuth 2.0 client credentials grant, relayed through the server.
pub struct ClientCredentialsLogin {
    api: Arc<ApiClient>,
    prompt: Arc<dyn Prompt>,
    provider: ProviderRef,
    client_id: String,
    client_secret: Option<String>,
}

impl ClientCredentialsLogin {
    #[must_use]
    pub fn new(
        api: Arc<ApiClient>,
        prompt: Arc<dyn Prompt>,
        provider: ProviderRef,
        client_id: String,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            api,
            prompt,
            provider,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl LoginStrategy for ClientCredentialsLogin {
    async fn set_missing_input(&mut self) -> Result<(), Report<ClientError>> {
        if self.client_secret.as_deref().is_none_or(str::is_empty) {
            self.client_secret = Some(self.prompt.ask("Client secret", true).await?);
        }
        Ok(())
    }

    async fn login(&self) -> Result<TokenPair, Report<ClientError>> {
        let client_secret = self
            .client_secret
            .as_deref()
            .ok_or(ClientError::MissingInput {
                field: "client secret",
            })?;
        self.api
            .post_form(
                &self.provider.path("token"),
                &[
                    ("grant_type", "client_credentials"),
                    ("client_id", &self.client_id),
                    ("client_secret", client_secret),
                ],
            )
            .await
    }
}
