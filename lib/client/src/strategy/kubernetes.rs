use super::LoginStrategy;
use crate::api::{ApiClient, TokenPair};
use crate::error::ClientError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Where pods find their service account token.
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const LOGIN_PATH: &str = "/api/auth/providers/kubernetes/login";

/// Delegates authentication to the Kubernetes API server.
pub struct KubernetesLogin {
    api: Arc<ApiClient>,
    token: Option<String>,
    token_path: PathBuf,
}

impl KubernetesLogin {
    #[must_use]
    pub fn new(api: Arc<ApiClient>, token: Option<String>) -> Self {
        Self {
            api,
            token,
            token_path: PathBuf::from(SERVICE_ACCOUNT_TOKEN_PATH),
        }
    }

    /// Reads the token from `path` instead of the mounted service account.
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }
}

#[async_trait]
impl LoginStrategy for KubernetesLogin {
    async fn set_missing_input(&mut self) -> Result<(), Report<ClientError>> {
        if self.token.is_some() {
            return Ok(());
        }
        debug!(path = %self.token_path.display(), "reading service account token");
        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| ClientError::Input {
                details: format!("{}: {}", self.token_path.display(), e),
            })?;
        self.token = Some(token.trim().to_string());
        Ok(())
    }

    async fn login(&self) -> Result<TokenPair, Report<ClientError>> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingInput {
                field: "kubernetes token",
            })?;
        self.api.post_bearer(LOGIN_PATH, token).await
    }
}
