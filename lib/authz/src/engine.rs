//! Role-based access decisions.
//!
//! The engine is a pure function of the caller's login, the query and the
//! current contents of the role store. Nothing is cached between calls:
//! a revoked binding takes effect on the very next request.

use crate::error::AuthzError;
use crate::store::RbacStore;
use crate::types::{Action, Permission};
use dashgate_core::Kind;
use rootcause::prelude::Report;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Key of cluster-wide entries in [`RbacEngine::user_permissions`].
pub const GLOBAL_PROJECT: &str = "*";

/// Evaluates permissions against guest permissions and role bindings.
#[derive(Clone)]
pub struct RbacEngine {
    store: Arc<dyn RbacStore>,
    guest_permissions: Vec<Permission>,
}

impl RbacEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(store: Arc<dyn RbacStore>, guest_permissions: Vec<Permission>) -> Self {
        Self {
            store,
            guest_permissions,
        }
    }

    /// Returns the configured guest permissions.
    #[must_use]
    pub fn guest_permissions(&self) -> &[Permission] {
        &self.guest_permissions
    }

    /// Whether the guest permissions alone grant `action` on `kind`.
    #[must_use]
    pub fn guest_allows(&self, action: Action, kind: Kind) -> bool {
        self.guest_permissions
            .iter()
            .any(|p| p.grants(action, kind, false))
    }

    /// Decides whether `login` may perform `action` on `kind` in `project`.
    ///
    /// An empty `project` asks about cluster-wide rights, which only guest
    /// permissions and global roles can grant. Project roles never grant
    /// rights on kinds that do not live in a project.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Store` if the role store fails.
    #[instrument(skip(self), fields(action = %action, kind = %kind))]
    pub async fn is_authorized(
        &self,
        login: &str,
        action: Action,
        kind: Kind,
        project: &str,
    ) -> Result<bool, Report<AuthzError>> {
        if self.guest_allows(action, kind) {
            debug!("granted by guest permissions");
            return Ok(true);
        }

        for binding in self.store.global_role_bindings().await? {
            if !binding.has_user(login) {
                continue;
            }
            let Some(role) = self.store.global_role(&binding.role).await? else {
                warn!(binding = %binding.name, role = %binding.role, "global role binding references a missing role");
                continue;
            };
            if role.permissions.iter().any(|p| p.grants(action, kind, false)) {
                debug!(role = %role.name, "granted by global role");
                return Ok(true);
            }
        }

        if project.is_empty() || !kind.is_project_scoped() {
            debug!("denied");
            return Ok(false);
        }

        for binding in self.store.role_bindings(Some(project)).await? {
            if !binding.has_user(login) {
                continue;
            }
            let Some(role) = self.store.role(project, &binding.role).await? else {
                warn!(binding = %binding.name, role = %binding.role, "role binding references a missing role");
                continue;
            };
            if role.permissions.iter().any(|p| p.grants(action, kind, true)) {
                debug!(role = %role.name, "granted by project role");
                return Ok(true);
            }
        }

        debug!("denied");
        Ok(false)
    }

    /// Like [`RbacEngine::is_authorized`], turning a denial into an error.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::PermissionDenied` on denial and
    /// `AuthzError::Store` if the role store fails.
    pub async fn require(
        &self,
        login: &str,
        action: Action,
        kind: Kind,
        project: &str,
    ) -> Result<(), Report<AuthzError>> {
        if self.is_authorized(login, action, kind, project).await? {
            return Ok(());
        }
        Err(AuthzError::PermissionDenied {
            login: login.to_string(),
            action: action.to_string(),
            kind,
            project: project.to_string(),
        }
        .into())
    }

    /// Collects the permissions of `login`, keyed by project.
    ///
    /// Guest and global role permissions are listed under
    /// [`GLOBAL_PROJECT`].
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Store` if the role store fails.
    #[instrument(skip(self))]
    pub async fn user_permissions(
        &self,
        login: &str,
    ) -> Result<BTreeMap<String, Vec<Permission>>, Report<AuthzError>> {
        let mut permissions: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
        permissions.insert(GLOBAL_PROJECT.to_string(), self.guest_permissions.clone());

        for binding in self.store.global_role_bindings().await? {
            if !binding.has_user(login) {
                continue;
            }
            match self.store.global_role(&binding.role).await? {
                Some(role) => permissions
                    .entry(GLOBAL_PROJECT.to_string())
                    .or_default()
                    .extend(role.permissions),
                None => warn!(role = %binding.role, "global role binding references a missing role"),
            }
        }

        for binding in self.store.role_bindings(None).await? {
            if !binding.has_user(login) {
                continue;
            }
            match self.store.role(&binding.project, &binding.role).await? {
                Some(role) => permissions
                    .entry(binding.project.clone())
                    .or_default()
                    .extend(role.permissions),
                None => warn!(project = %binding.project, role = %binding.role, "role binding references a missing role"),
            }
        }

        Ok(permissions)
    }

    /// Lists the projects in which `login` may perform `action` on `kind`.
    ///
    /// Returns `["*"]` when the right is held cluster-wide.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Store` if the role store fails.
    pub async fn user_projects(
        &self,
        login: &str,
        action: Action,
        kind: Kind,
    ) -> Result<Vec<String>, Report<AuthzError>> {
        if self.is_authorized(login, action, kind, "").await? {
            return Ok(vec![GLOBAL_PROJECT.to_string()]);
        }
        if !kind.is_project_scoped() {
            return Ok(Vec::new());
        }

        let permissions = self.user_permissions(login).await?;
        Ok(permissions
            .into_iter()
            .filter(|(project, _)| project != GLOBAL_PROJECT)
            .filter(|(_, perms)| perms.iter().any(|p| p.grants(action, kind, true)))
            .map(|(project, _)| project)
            .collect())
    }
}
