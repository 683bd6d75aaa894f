//! Interaction with the person running the client.

use crate::error::ClientError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Asks for missing input and shows progress messages.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Asks for a value. `secret` marks values that must not be logged.
    async fn ask(&self, label: &str, secret: bool) -> Result<String, Report<ClientError>>;

    /// Shows a message.
    async fn notify(&self, message: &str) -> Result<(), Report<ClientError>>;
}

/// Reads answers from stdin and writes messages to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

#[async_trait]
impl Prompt for StdinPrompt {
    async fn ask(&self, label: &str, _secret: bool) -> Result<String, Report<ClientError>> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{}: ", label).as_bytes())
            .await
            .map_err(input_error)?;
        stdout.flush().await.map_err(input_error)?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(input_error)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn notify(&self, message: &str) -> Result<(), Report<ClientError>> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{}\n", message).as_bytes())
            .await
            .map_err(input_error)?;
        stdout.flush().await.map_err(input_error)?;
        Ok(())
    }
}

fn input_error(e: std::io::Error) -> ClientError {
    ClientError::Input {
        details: e.to_string(),
    }
}
