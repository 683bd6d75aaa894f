//! Role-based authorization for dashgate.
//!
//! A caller is allowed an action on a resource kind in a project when any of
//! the following grants it:
//!
//! - the configured guest permissions,
//! - a global role bound to the caller,
//! - a role of that project bound to the caller.
//!
//! Decisions are recomputed from the [`RbacStore`] on every call.

mod engine;
mod error;
mod store;
mod types;

pub use engine::{GLOBAL_PROJECT, RbacEngine};
pub use error::AuthzError;
pub use store::{MemoryRbacStore, RbacStore};
pub use types::{
    Action, GlobalRole, GlobalRoleBinding, Permission, Role, RoleBinding, Scope, Subject,
    SubjectKind,
};
