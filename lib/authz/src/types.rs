//! Authorization types: actions, scopes, permissions, roles and bindings.

use crate::error::AuthzError;
use dashgate_core::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An action a permission may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    /// Any action.
    Wildcard,
}

impl Action {
    /// Returns the action name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Wildcard => "*",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "*" => Ok(Self::Wildcard),
            other => Err(AuthzError::InvalidInput {
                details: format!("unknown action '{}'", other),
            }),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

/// What a permission applies to.
///
/// `Kind(Kind::Project)` doubles as the project-scope marker: inside a
/// project role it covers every kind living in the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// A single resource kind.
    Kind(Kind),
    /// Any kind, cluster-wide.
    Wildcard,
}

impl Scope {
    /// The project-scope marker.
    pub const PROJECT: Scope = Scope::Kind(Kind::Project);
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "{}", kind),
            Self::Wildcard => write!(f, "*"),
        }
    }
}

impl FromStr for Scope {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::Wildcard);
        }
        s.parse::<Kind>()
            .map(Self::Kind)
            .map_err(|e| AuthzError::InvalidInput {
                details: e.to_string(),
            })
    }
}

impl TryFrom<String> for Scope {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Grants every listed action on every listed scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub actions: Vec<Action>,
    pub scopes: Vec<Scope>,
}

impl Permission {
    /// Creates a permission.
    #[must_use]
    pub fn new(actions: impl Into<Vec<Action>>, scopes: impl Into<Vec<Scope>>) -> Self {
        Self {
            actions: actions.into(),
            scopes: scopes.into(),
        }
    }

    /// Whether this permission grants `action` on `kind`.
    ///
    /// `in_project_role` widens the project-scope marker to every kind that
    /// lives inside a project.
    #[must_use]
    pub fn grants(&self, action: Action, kind: Kind, in_project_role: bool) -> bool {
        let action_matches = self
            .actions
            .iter()
            .any(|a| *a == Action::Wildcard || *a == action);
        let scope_matches = self.scopes.iter().any(|scope| match scope {
            Scope::Wildcard => true,
            Scope::Kind(k) if *k == kind => true,
            Scope::Kind(Kind::Project) => in_project_role && kind.is_project_scoped(),
            Scope::Kind(_) => false,
        });
        action_matches && scope_matches
    }
}

/// Kind of entity a binding subject designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
}

/// A principal named by a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
}

impl Subject {
    /// A user subject.
    #[must_use]
    pub fn user(login: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: login.into(),
        }
    }
}

fn names_user(subjects: &[Subject], login: &str) -> bool {
    subjects
        .iter()
        .any(|s| s.kind == SubjectKind::User && s.name == login)
}

/// A named set of permissions inside one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub project: String,
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// A named set of cluster-wide permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRole {
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// Binds a role of `project` to subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub project: String,
    pub name: String,
    /// Name of the bound role, in the same project.
    pub role: String,
    pub subjects: Vec<Subject>,
}

impl RoleBinding {
    /// Whether `login` is one of the subjects.
    #[must_use]
    pub fn has_user(&self, login: &str) -> bool {
        names_user(&self.subjects, login)
    }
}

/// Binds a global role to subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRoleBinding {
    pub name: String,
    /// Name of the bound global role.
    pub role: String,
    pub subjects: Vec<Subject>,
}

impl GlobalRoleBinding {
    /// Whether `login` is one of the subjects.
    #[must_use]
    pub fn has_user(&self, login: &str) -> bool {
        names_user(&self.subjects, login)
    }
}
