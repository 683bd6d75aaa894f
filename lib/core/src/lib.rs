//! Core domain types and utilities for dashgate.
//!
//! This crate provides the foundational types shared by the identity,
//! authorization, client and server crates: the error taxonomy, the
//! resource kinds guarded by access control, and typed identifiers.

pub mod error;
pub mod id;
pub mod kind;

pub use error::{ErrorKind, Result};
pub use id::{ParseIdError, RefreshTokenId};
pub use kind::{Kind, ParseKindError};
