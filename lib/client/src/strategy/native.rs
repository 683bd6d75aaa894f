use super::LoginStrategy;
use crate::api::{ApiClient, TokenPair};
use crate::error::ClientError;
use crate::prompt::Prompt;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Serialize;
use std::sync::Arc;

const LOGIN_PATH: &str = "/api/auth/providers/native/login";

/// Login/password authentication against the server's own accounts.
pub struct NativeLogin {
    api: Arc<ApiClient>,
    prompt: Arc<dyn Prompt>,
    login: Option<String>,
    password: Option<String>,
}

impl NativeLogin {
    #[must_use]
    pub fn new(
        api: Arc<ApiClient>,
        prompt: Arc<dyn Prompt>,
        login: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            api,
            prompt,
            login,
            password,
        }
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    login: &'a str,
    password: &'a str,
}

#[async_trait]
impl LoginStrategy for NativeLogin {
    async fn set_missing_input(&mut self) -> Result<(), Report<ClientError>> {
        if self.login.as_deref().is_none_or(str::is_empty) {
            self.login = Some(self.prompt.ask("Login", false).await?);
        }
        if self.password.as_deref().is_none_or(str::is_empty) {
            self.password = Some(self.prompt.ask("Password", true).await?);
        }
        Ok(())
    }

    async fn login(&self) -> Result<TokenPair, Report<ClientError>> {
        let login = self
            .login
            .as_deref()
            .ok_or(ClientError::MissingInput { field: "login" })?;
        let password = self
            .password
            .as_deref()
            .ok_or(ClientError::MissingInput { field: "password" })?;
        self.api
            .post_json(LOGIN_PATH, &Credentials { login, password })
            .await
    }
}
