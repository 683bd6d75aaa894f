//! Spent refresh tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashgate_core::RefreshTokenId;
use dashgate_identity::{RefreshTokenLedger, StoreError};
use sqlx::PgPool;
use tracing::debug;

use super::users::backend;

/// Ledger stored in the `spent_refresh_tokens` table, shared by replicas.
pub struct PgRefreshTokenLedger {
    pool: PgPool,
}

impl PgRefreshTokenLedger {
    /// Creates a new ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes entries whose token has expired anyway.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the query fails.
    pub async fn delete_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM spent_refresh_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshTokenLedger {
    async fn consume(
        &self,
        id: RefreshTokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO spent_refresh_tokens (id, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let fresh = result.rows_affected() == 1;
        if !fresh {
            debug!(%id, "refresh token already spent");
        }
        Ok(fresh)
    }
}
