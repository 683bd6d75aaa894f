//! User documents.

use async_trait::async_trait;
use dashgate_identity::{StoreError, User, UserStore};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    doc: Json<User>,
}

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

/// Users stored in the `users` table.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Creates a new user store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT doc
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|r| r.doc.0))
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (login, doc, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (login) DO NOTHING
            "#,
        )
        .bind(user.login())
        .bind(Json(user))
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                name: user.login().to_string(),
            });
        }
        Ok(())
    }

    async fn update(&self, current: &User, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET doc = $2, updated_at = $3
            WHERE login = $1 AND doc = $4
            "#,
        )
        .bind(user.login())
        .bind(Json(user))
        .bind(user.updated_at())
        .bind(Json(current))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE login = $1")
            .bind(user.login())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let name = user.login().to_string();
        Err(match exists {
            Some(_) => StoreError::Stale { name },
            None => StoreError::NotFound { name },
        })
    }
}
