//! Read access to roles and bindings.

use crate::error::AuthzError;
use crate::types::{GlobalRole, GlobalRoleBinding, Role, RoleBinding};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Source of roles and bindings consulted by the engine.
#[async_trait]
pub trait RbacStore: Send + Sync {
    /// Fetches a role of `project`.
    async fn role(&self, project: &str, name: &str) -> Result<Option<Role>, AuthzError>;

    /// Lists role bindings of `project`, or of every project when `None`.
    async fn role_bindings(&self, project: Option<&str>) -> Result<Vec<RoleBinding>, AuthzError>;

    /// Fetches a global role.
    async fn global_role(&self, name: &str) -> Result<Option<GlobalRole>, AuthzError>;

    /// Lists every global role binding.
    async fn global_role_bindings(&self) -> Result<Vec<GlobalRoleBinding>, AuthzError>;
}

type ProjectKey = (String, String);

/// Process-local role store.
#[derive(Debug, Default)]
pub struct MemoryRbacStore {
    roles: RwLock<BTreeMap<ProjectKey, Role>>,
    role_bindings: RwLock<BTreeMap<ProjectKey, RoleBinding>>,
    global_roles: RwLock<BTreeMap<String, GlobalRole>>,
    global_role_bindings: RwLock<BTreeMap<String, GlobalRoleBinding>>,
}

impl MemoryRbacStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a role.
    pub async fn put_role(&self, role: Role) {
        let key = (role.project.clone(), role.name.clone());
        self.roles.write().await.insert(key, role);
    }

    /// Inserts or replaces a role binding.
    pub async fn put_role_binding(&self, binding: RoleBinding) {
        let key = (binding.project.clone(), binding.name.clone());
        self.role_bindings.write().await.insert(key, binding);
    }

    /// Inserts or replaces a global role.
    pub async fn put_global_role(&self, role: GlobalRole) {
        self.global_roles
            .write()
            .await
            .insert(role.name.clone(), role);
    }

    /// Inserts or replaces a global role binding.
    pub async fn put_global_role_binding(&self, binding: GlobalRoleBinding) {
        self.global_role_bindings
            .write()
            .await
            .insert(binding.name.clone(), binding);
    }

    /// Removes a role; bindings referencing it are kept.
    pub async fn delete_role(&self, project: &str, name: &str) {
        self.roles
            .write()
            .await
            .remove(&(project.to_string(), name.to_string()));
    }
}

#[async_trait]
impl RbacStore for MemoryRbacStore {
    async fn role(&self, project: &str, name: &str) -> Result<Option<Role>, AuthzError> {
        let key = (project.to_string(), name.to_string());
        Ok(self.roles.read().await.get(&key).cloned())
    }

    async fn role_bindings(&self, project: Option<&str>) -> Result<Vec<RoleBinding>, AuthzError> {
        let bindings = self.role_bindings.read().await;
        Ok(bindings
            .values()
            .filter(|b| project.is_none_or(|p| b.project == p))
            .cloned()
            .collect())
    }

    async fn global_role(&self, name: &str) -> Result<Option<GlobalRole>, AuthzError> {
        Ok(self.global_roles.read().await.get(name).cloned())
    }

    async fn global_role_bindings(&self) -> Result<Vec<GlobalRoleBinding>, AuthzError> {
        Ok(self
            .global_role_bindings
            .read()
            .await
            .values()
            .cloned()
            .collect())
    }
}
