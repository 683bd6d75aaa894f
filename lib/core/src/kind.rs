//! Resource kinds guarded by access control.
//!
//! Kinds split in two families: those that live inside a project and those
//! that exist cluster-wide. Project roles can only ever grant rights on the
//! first family.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of resource managed by the dashboard backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Dashboard,
    Datasource,
    EphemeralDashboard,
    Folder,
    Project,
    Role,
    RoleBinding,
    Secret,
    Variable,
    GlobalDatasource,
    GlobalRole,
    GlobalRoleBinding,
    GlobalSecret,
    GlobalVariable,
    User,
}

impl Kind {
    /// Every kind, in declaration order.
    pub const ALL: [Kind; 15] = [
        Kind::Dashboard,
        Kind::Datasource,
        Kind::EphemeralDashboard,
        Kind::Folder,
        Kind::Project,
        Kind::Role,
        Kind::RoleBinding,
        Kind::Secret,
        Kind::Variable,
        Kind::GlobalDatasource,
        Kind::GlobalRole,
        Kind::GlobalRoleBinding,
        Kind::GlobalSecret,
        Kind::GlobalVariable,
        Kind::User,
    ];

    /// Returns the canonical name, as used in permission scopes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "Dashboard",
            Self::Datasource => "Datasource",
            Self::EphemeralDashboard => "EphemeralDashboard",
            Self::Folder => "Folder",
            Self::Project => "Project",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::Secret => "Secret",
            Self::Variable => "Variable",
            Self::GlobalDatasource => "GlobalDatasource",
            Self::GlobalRole => "GlobalRole",
            Self::GlobalRoleBinding => "GlobalRoleBinding",
            Self::GlobalSecret => "GlobalSecret",
            Self::GlobalVariable => "GlobalVariable",
            Self::User => "User",
        }
    }

    /// Whether resources of this kind are stored inside a project.
    ///
    /// `Project` itself counts: a project's own document is addressed
    /// through the project it names.
    #[must_use]
    pub const fn is_project_scoped(self) -> bool {
        matches!(
            self,
            Self::Dashboard
                | Self::Datasource
                | Self::EphemeralDashboard
                | Self::Folder
                | Self::Project
                | Self::Role
                | Self::RoleBinding
                | Self::Secret
                | Self::Variable
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKindError {
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for ParseKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown resource kind '{}'", self.input)
    }
}

impl std::error::Error for ParseKindError {}

impl FromStr for Kind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseKindError {
                input: s.to_string(),
            })
    }
}
