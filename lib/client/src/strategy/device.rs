use super::LoginStrategy;
use crate::api::{ApiClient, ProviderRef, TokenPair};
use crate::error::ClientError;
use crate::prompt::Prompt;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_INTERVAL_SECONDS: u64 = 5;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Device authorization response relayed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum Poll {
    Again,
    SlowDown,
}

fn next_poll(report: Report<ClientError>) -> Result<Poll, Report<ClientError>> {
    let ClientError::Provider { error, .. } = report.current_context() else {
        return Err(report);
    };
    match error.as_str() {
        "authorization_pending" => Ok(Poll::Again),
        "slow_down" => Ok(Poll::SlowDown),
        "access_denied" => Err(ClientError::AccessDenied.into()),
        "expired_token" => Err(ClientError::ExpiredToken.into()),
        _ => Err(report),
    }
}

/// OAuth 2.0 device authorization grant, relayed through the server.
pub struct DeviceCodeLogin {
    api: Arc<ApiClient>,
    prompt: Arc<dyn Prompt>,
    provider: ProviderRef,
}

impl DeviceCodeLogin {
    #[must_use]
    pub fn new(api: Arc<ApiClient>, prompt: Arc<dyn Prompt>, provider: ProviderRef) -> Self {
        Self {
            api,
            prompt,
            provider,
        }
    }
}

#[async_trait]
impl LoginStrategy for DeviceCodeLogin {
    async fn set_missing_input(&mut self) -> Result<(), Report<ClientError>> {
        Ok(())
    }

    async fn login(&self) -> Result<TokenPair, Report<ClientError>> {
        let authorization: DeviceAuthorization = self
            .api
            .post_form(&self.provider.path("device/code"), &[])
            .await?;

        self.prompt
            .notify(&format!(
                "Go to {} and enter this user code: {}",
                authorization.verification_uri, authorization.user_code
            ))
            .await?;
        self.prompt
            .notify("Waiting for user to authorize the application...")
            .await?;

        let mut interval = Duration::from_secs(
            authorization
                .interval
                .unwrap_or(DEFAULT_INTERVAL_SECONDS),
        );
        let deadline = authorization
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let token_path = self.provider.path("token");

        loop {
            tokio::time::sleep(interval).await;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ClientError::ExpiredToken.into());
            }

            let attempt = self
                .api
                .post_form(
                    &token_path,
                    &[
                        ("grant_type", DEVICE_CODE_GRANT),
                        ("device_code", &authorization.device_code),
                    ],
                )
                .await;
            match attempt {
                Ok(tokens) => return Ok(tokens),
                Err(report) => match next_poll(report)? {
                    Poll::Again => debug!("authorization pending"),
                    Poll::SlowDown => {
                        interval += SLOW_DOWN_STEP;
                        debug!(interval_secs = interval.as_secs(), "provider asked to slow down");
                    }
                },
            }
        }
    }
}
