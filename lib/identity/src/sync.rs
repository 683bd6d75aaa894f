//! Synchronization of external identities into local users.
//!
//! A successful external login always lands here before a session is
//! minted. The service creates unknown users, merges profile changes, and
//! refuses any merge that would let a second identity provider take over an
//! existing account.

use crate::error::{StoreError, SyncError};
use crate::store::UserStore;
use crate::user::User;
use crate::userinfo::ExternalIdentity;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Maps external identities onto user records.
#[derive(Clone)]
pub struct UserSync {
    store: Arc<dyn UserStore>,
}

impl UserSync {
    /// Creates the service over a user store.
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Creates or updates the local user matching `identity`.
    ///
    /// Writes only when the user is new or something actually changed.
    /// Writes are conditional on the record read; when a concurrent login
    /// wins the race the merge is redone against the fresh record.
    ///
    /// # Errors
    ///
    /// - `SyncError::EmptyLogin` if the identity has no login
    /// - `SyncError::NativeAccount` if the login belongs to a password account
    /// - `SyncError::ProviderConflict` if another provider is already bound
    /// - `SyncError::Store` on storage failures, or when the record keeps
    ///   changing underneath
    #[instrument(skip(self, identity), fields(login = %identity.login))]
    pub async fn sync_user(&self, identity: &ExternalIdentity) -> Result<User, Report<SyncError>> {
        if identity.login.is_empty() {
            return Err(SyncError::EmptyLogin.into());
        }

        let mut attempt = 1;
        loop {
            match self.try_sync(identity).await {
                Err(SyncAttempt::Lost(e)) if attempt < MAX_SYNC_ATTEMPTS => {
                    debug!(attempt, error = %e, "user changed concurrently, retrying");
                    attempt += 1;
                }
                Err(SyncAttempt::Lost(e)) => return Err(store_error(e).into()),
                Err(SyncAttempt::Failed(e)) => return Err(e.into()),
                Ok(user) => return Ok(user),
            }
        }
    }

    async fn try_sync(&self, identity: &ExternalIdentity) -> Result<User, SyncAttempt> {
        let existing = self
            .store
            .get(&identity.login)
            .await
            .map_err(|e| SyncAttempt::Failed(store_error(e)))?;
        let mut user = existing
            .clone()
            .unwrap_or_else(|| User::new(&identity.login));

        let mut changed = user.merge_first_name(identity.first_name.as_deref());
        changed |= user.merge_last_name(identity.last_name.as_deref());
        changed |= merge_provider(&mut user, identity).map_err(SyncAttempt::Failed)?;

        match existing {
            None => {
                user.stamp_created();
                self.store.create(&user).await.map_err(SyncAttempt::from)?;
                debug!("created user from external identity");
            }
            Some(current) if changed => {
                user.stamp_updated();
                self.store
                    .update(&current, &user)
                    .await
                    .map_err(SyncAttempt::from)?;
                debug!("updated user from external identity");
            }
            Some(_) => {}
        }

        Ok(user)
    }
}

const MAX_SYNC_ATTEMPTS: usize = 3;

/// Outcome of a failed pass of `try_sync`.
enum SyncAttempt {
    /// Another writer got there first.
    Lost(StoreError),
    Failed(SyncError),
}

impl From<StoreError> for SyncAttempt {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists { .. } | StoreError::Stale { .. } => Self::Lost(e),
            other => Self::Failed(store_error(other)),
        }
    }
}

/// Returns whether a binding was added.
fn merge_provider(user: &mut User, identity: &ExternalIdentity) -> Result<bool, SyncError> {
    if user.is_native() {
        warn!("refusing to federate a native account");
        return Err(SyncError::NativeAccount {
            login: user.login().to_string(),
        });
    }

    let Some(incoming) = &identity.provider else {
        return Ok(false);
    };

    if let Some(bound) = user.oauth_providers().first() {
        if user.oauth_providers().iter().any(|b| b.same_account(incoming)) {
            return Ok(false);
        }
        warn!(
            bound_issuer = %bound.issuer,
            incoming_issuer = %incoming.issuer,
            "refusing to bind a second identity provider"
        );
        return Err(SyncError::ProviderConflict {
            login: user.login().to_string(),
            bound_issuer: bound.issuer.clone(),
            incoming_issuer: incoming.issuer.clone(),
        });
    }

    user.push_provider(incoming.clone());
    Ok(true)
}

fn store_error(e: StoreError) -> SyncError {
    SyncError::Store {
        details: e.to_string(),
    }
}
