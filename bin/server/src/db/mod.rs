//! PostgreSQL implementations of the storage seams.
//!
//! This module provides:
//! - Users as JSONB documents keyed by login
//! - Read access to roles and bindings managed by the resource API
//! - The spent refresh-token ledger

pub mod rbac;
pub mod refresh;
pub mod users;

pub use rbac::PgRbacStore;
pub use refresh::PgRefreshTokenLedger;
pub use users::PgUserStore;
