//! Persistence interfaces consumed by the core.
//!
//! The core does not pick a storage engine; it states the access patterns
//! it needs (unique email, role lookup by name, last-N password hashes)
//! and ships in-memory implementations for tests and embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Role, User};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("repository unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

/// CRUD over user records, plus the password-history query backing the
/// reuse-prevention window.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. Fails with `DuplicateEmail` when the normalized
    /// email is already taken.
    async fn insert(&self, user: &User) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Lookup by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_by_external_identity(
        &self,
        provider: &str,
        external_user_id: &str,
    ) -> Result<Option<User>, RepositoryError>;

    async fn update(&self, user: &User) -> Result<(), RepositoryError>;

    /// Most-recent-first password hashes, at most `limit` entries.
    async fn password_history(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError>;

    /// Prepend a hash to the user's history, trimming to `keep` entries.
    async fn push_password_history(
        &self,
        user_id: Uuid,
        hash: &str,
        keep: usize,
    ) -> Result<(), RepositoryError>;
}

/// CRUD over role definitions.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn upsert(&self, role: &Role) -> Result<(), RepositoryError>;

    async fn find(&self, name: &str) -> Result<Option<Role>, RepositoryError>;

    async fn all(&self) -> Result<Vec<Role>, RepositoryError>;

    async fn delete(&self, name: &str) -> Result<bool, RepositoryError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UserTables {
    users: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
    password_history: HashMap<Uuid, Vec<String>>,
}

/// In-memory user repository for tests and embedded use.
#[derive(Default)]
pub struct InMemoryUserRepository {
    tables: Mutex<UserTables>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, UserTables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|e| RepositoryError::Unavailable(anyhow::anyhow!("mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables.by_email.contains_key(&user.email) {
            return Err(RepositoryError::DuplicateEmail);
        }
        tables.by_email.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_external_identity(
        &self,
        provider: &str,
        external_user_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .find(|u| {
                u.external_identities
                    .iter()
                    .any(|i| i.provider == provider && i.external_user_id == external_user_id)
            })
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        let tables = &mut *guard;
        if let Some(existing) = tables.users.get(&user.id) {
            if existing.email != user.email {
                tables.by_email.remove(&existing.email);
                tables.by_email.insert(user.email.clone(), user.id);
            }
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn password_history(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .password_history
            .get(&user_id)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn push_password_history(
        &self,
        user_id: Uuid,
        hash: &str,
        keep: usize,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let history = tables.password_history.entry(user_id).or_default();
        history.insert(0, hash.to_string());
        history.truncate(keep);
        Ok(())
    }
}

/// In-memory role repository for tests and embedded use.
#[derive(Default)]
pub struct InMemoryRoleRepository {
    roles: Mutex<HashMap<String, Role>>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Role>>, RepositoryError> {
        self.roles
            .lock()
            .map_err(|e| RepositoryError::Unavailable(anyhow::anyhow!("mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn upsert(&self, role: &Role) -> Result<(), RepositoryError> {
        self.lock()?.insert(role.name.clone(), role.clone());
        Ok(())
    }

    async fn find(&self, name: &str) -> Result<Option<Role>, RepositoryError> {
        Ok(self.lock()?.get(name).cloned())
    }

    async fn all(&self) -> Result<Vec<Role>, RepositoryError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.remove(name).is_some())
    }
}
