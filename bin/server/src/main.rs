use dashgate_server::app::{Stores, build_app};
use dashgate_server::config::ServerConfig;
use dashgate_server::db::PgRefreshTokenLedger;
use dashgate_server::error::StartupError;
use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LEDGER_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        tracing::error!(error = %report.current_context(), "server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    let config = ServerConfig::load().map_err(StartupError::config)?;
    config.verify().map_err(StartupError::config)?;
    tracing::info!("Loaded configuration");

    let stores = match &config.database_url {
        Some(url) => {
            let database = |e: &dyn std::fmt::Display| StartupError::Database {
                details: e.to_string(),
            };
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(|e| database(&e))?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&db_pool)
                .await
                .map_err(|e| database(&e))?;

            let ledger = PgRefreshTokenLedger::new(db_pool.clone());
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(LEDGER_CLEANUP_INTERVAL);
                loop {
                    interval.tick().await;
                    match ledger.delete_expired().await {
                        Ok(count) if count > 0 => {
                            tracing::debug!(deleted = count, "Pruned spent refresh tokens");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to prune spent refresh tokens");
                        }
                    }
                }
            });

            Stores::postgres(db_pool)
        }
        None => {
            tracing::warn!("No database_url configured, using in-memory stores");
            Stores::memory()
        }
    };

    let app = build_app(&config, stores).await?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Io {
            details: format!("failed to bind to {}: {}", config.listen_addr, e),
        })?;
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Io {
            details: format!("server error: {}", e),
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
