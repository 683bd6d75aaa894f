//! Roles and bindings.
//!
//! The resource API owns these tables; this store only reads them.

use async_trait::async_trait;
use dashgate_authz::{AuthzError, GlobalRole, GlobalRoleBinding, RbacStore, Role, RoleBinding};
use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Row type for role lookups.
#[derive(FromRow)]
struct RoleRow {
    doc: Json<Role>,
}

/// Row type for global role lookups.
#[derive(FromRow)]
struct GlobalRoleRow {
    doc: Json<GlobalRole>,
}

fn store_error(e: sqlx::Error) -> AuthzError {
    AuthzError::Store {
        details: e.to_string(),
    }
}

/// Role store over the `roles`, `role_bindings`, `global_roles` and
/// `global_role_bindings` tables.
pub struct PgRbacStore {
    pool: PgPool,
}

impl PgRbacStore {
    /// Creates a new role store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_all<T>(
        &self,
        query: &'static str,
        project: Option<&str>,
    ) -> Result<Vec<T>, AuthzError>
    where
        T: DeserializeOwned + Send + Unpin + 'static,
    {
        let mut query = sqlx::query_scalar::<_, Json<T>>(query);
        if let Some(project) = project {
            query = query.bind(project.to_string());
        }
        let docs = query.fetch_all(&self.pool).await.map_err(store_error)?;
        Ok(docs.into_iter().map(|doc| doc.0).collect())
    }
}

#[async_trait]
impl RbacStore for PgRbacStore {
    async fn role(&self, project: &str, name: &str) -> Result<Option<Role>, AuthzError> {
        let row: Option<RoleRow> = sqlx::query_as(
            r#"
            SELECT doc
            FROM roles
            WHERE project = $1 AND name = $2
            "#,
        )
        .bind(project)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|r| r.doc.0))
    }

    async fn role_bindings(&self, project: Option<&str>) -> Result<Vec<RoleBinding>, AuthzError> {
        match project {
            Some(project) => {
                self.fetch_all(
                    "SELECT doc FROM role_bindings WHERE project = $1 ORDER BY name",
                    Some(project),
                )
                .await
            }
            None => {
                self.fetch_all(
                    "SELECT doc FROM role_bindings ORDER BY project, name",
                    None,
                )
                .await
            }
        }
    }

    async fn global_role(&self, name: &str) -> Result<Option<GlobalRole>, AuthzError> {
        let row: Option<GlobalRoleRow> = sqlx::query_as(
            r#"
            SELECT doc
            FROM global_roles
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|r| r.doc.0))
    }

    async fn global_role_bindings(&self) -> Result<Vec<GlobalRoleBinding>, AuthzError> {
        self.fetch_all("SELECT doc FROM global_role_bindings ORDER BY name", None)
            .await
    }
}
