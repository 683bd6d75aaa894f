//! Storage seams for users and spent refresh tokens.
//!
//! The persistence format is owned by the implementor. In-memory versions
//! live here; the server ships PostgreSQL ones.

use crate::error::StoreError;
use crate::user::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashgate_core::RefreshTokenId;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

/// Reads and writes user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Looks a user up by login.
    async fn get(&self, login: &str) -> Result<Option<User>, StoreError>;

    /// Inserts a new user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the login is taken.
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    /// Replaces `current` with `user`, provided the stored record still
    /// equals `current`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no user has that login and
    /// `StoreError::Stale` if the record changed since `current` was read.
    async fn update(&self, current: &User, user: &User) -> Result<(), StoreError>;
}

/// Remembers which refresh tokens were already exchanged.
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Marks a refresh token as spent.
    ///
    /// Returns `false` when the token had already been spent. Entries may be
    /// forgotten once `expires_at` has passed, since the signature check
    /// rejects the token from then on.
    async fn consume(
        &self,
        id: RefreshTokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Process-local user store.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many users are stored.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether the store holds no user.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, login: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(login).cloned())
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(user.login()) {
            return Err(StoreError::AlreadyExists {
                name: user.login().to_string(),
            });
        }
        users.insert(user.login().to_string(), user.clone());
        Ok(())
    }

    async fn update(&self, current: &User, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(user.login()) {
            Some(existing) if existing == current => {
                *existing = user.clone();
                Ok(())
            }
            Some(_) => Err(StoreError::Stale {
                name: user.login().to_string(),
            }),
            None => Err(StoreError::NotFound {
                name: user.login().to_string(),
            }),
        }
    }
}

/// Process-local refresh-token ledger.
///
/// Rotation is only enforced within one process; replicas need a shared
/// ledger.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenLedger {
    spent: Mutex<HashMap<RefreshTokenId, DateTime<Utc>>>,
}

impl MemoryRefreshTokenLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenLedger for MemoryRefreshTokenLedger {
    async fn consume(
        &self,
        id: RefreshTokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut spent = self.spent.lock().await;
        let now = Utc::now();
        spent.retain(|_, expiry| *expiry > now);
        if spent.contains_key(&id) {
            return Ok(false);
        }
        spent.insert(id, expires_at);
        Ok(true)
    }
}
