//! Native login/password accounts.

use crate::error::{LoginError, StoreError};
use crate::password::{hash_password, verify_dummy, verify_password};
use crate::store::UserStore;
use crate::user::User;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Input to create a native account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNativeUser {
    pub login: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Checks and creates native credentials.
#[derive(Clone)]
pub struct NativeAccounts {
    store: Arc<dyn UserStore>,
}

impl NativeAccounts {
    /// Creates the service over a user store.
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Authenticates a login/password pair.
    ///
    /// Unknown logins, accounts without a password and wrong passwords all
    /// yield the same `LoginError::WrongCredentials`, after the same amount
    /// of hashing work.
    ///
    /// # Errors
    ///
    /// Returns `LoginError::MissingCredentials` for empty input,
    /// `LoginError::WrongCredentials` on any mismatch, and
    /// `LoginError::Store` if the lookup fails.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, Report<LoginError>> {
        if login.is_empty() || password.is_empty() {
            return Err(LoginError::MissingCredentials.into());
        }

        let user = self.store.get(login).await.map_err(store_error)?;
        let Some(user) = user else {
            verify_dummy(password);
            debug!("unknown login");
            return Err(LoginError::WrongCredentials.into());
        };

        let Some(hash) = user.password_hash() else {
            verify_dummy(password);
            debug!("account has no password");
            return Err(LoginError::WrongCredentials.into());
        };
        if verify_password(password, hash) {
            Ok(user)
        } else {
            debug!("password mismatch");
            Err(LoginError::WrongCredentials.into())
        }
    }

    /// Creates a native account with a hashed password.
    ///
    /// # Errors
    ///
    /// Returns `LoginError::MissingCredentials` for an empty login or
    /// password, `LoginError::AlreadyExists` if the login is taken, and
    /// `LoginError::Hashing`/`LoginError::Store` on internal failures.
    #[instrument(skip(self, new_user), fields(login = %new_user.login))]
    pub async fn create(&self, new_user: NewNativeUser) -> Result<User, Report<LoginError>> {
        if new_user.login.is_empty() || new_user.password.is_empty() {
            return Err(LoginError::MissingCredentials.into());
        }

        let hash = hash_password(&new_user.password)?;
        let mut user = User::new(new_user.login)
            .with_name(new_user.first_name, new_user.last_name)
            .with_password_hash(hash);
        user.stamp_created();

        self.store.create(&user).await.map_err(|e| match e {
            StoreError::AlreadyExists { name } => LoginError::AlreadyExists { login: name },
            other => store_error(other),
        })?;
        debug!("created native user");
        Ok(user)
    }
}

fn store_error(e: StoreError) -> LoginError {
    LoginError::Store {
        details: e.to_string(),
    }
}
