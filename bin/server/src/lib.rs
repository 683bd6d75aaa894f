//! dashgate server: identity provider endpoints, sessions and RBAC checks.
//!
//! [`app::build_app`] assembles the router from a [`config::ServerConfig`];
//! resource handlers guard themselves with the [`auth::Caller`] extractor
//! and [`auth::AppState::check_permission`].

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod user;

#[cfg(test)]
pub(crate) mod test_support;
