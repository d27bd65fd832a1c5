use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::{RepositoryError, UserRepository};
use crate::clock::Clock;
use crate::error::IdentifierField;
use crate::models::{Membership, NewUser, UserRecord};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    memberships: HashMap<Uuid, Membership>,
}

/// Repository backed by process memory, used by tests and local runs.
pub struct InMemoryUserRepository {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
    /// Membership handed to users created through `create_user`.
    default_membership: Option<Membership>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> RepositoryError {
    RepositoryError::Unavailable(anyhow::anyhow!("repository lock poisoned: {}", e))
}

impl InMemoryUserRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
            default_membership: None,
        }
    }

    pub fn with_default_membership(mut self, membership: Membership) -> Self {
        self.default_membership = Some(membership);
        self
    }

    /// Inserts a fully formed account, replacing any account with the same id.
    pub fn insert(&self, user: UserRecord, membership: Option<Membership>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if let Some(m) = membership {
            tables.memberships.insert(user.user_id, m);
        }
        tables.users.insert(user.user_id, user);
        Ok(())
    }

    pub fn set_active(&self, user_id: Uuid, active: bool) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.is_active = active;
        }
        Ok(())
    }

    fn any_user(&self, pred: impl Fn(&UserRecord) -> bool) -> Result<bool, RepositoryError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.users.values().any(pred))
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(identifier) || u.username == identifier)
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>, RepositoryError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn find_membership(&self, user_id: Uuid) -> Result<Option<Membership>, RepositoryError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.memberships.get(&user_id).cloned())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, RepositoryError> {
        self.any_user(|u| u.email.eq_ignore_ascii_case(email))
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, RepositoryError> {
        self.any_user(|u| u.username == username)
    }

    async fn exists_by_phone(&self, phone: &str) -> Result<bool, RepositoryError> {
        self.any_user(|u| u.phone.as_deref() == Some(phone))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, RepositoryError> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        // Re-checked under the write lock; the caller's checks can race.
        for existing in tables.users.values() {
            if existing.email.eq_ignore_ascii_case(&user.email) {
                return Err(RepositoryError::Conflict(IdentifierField::Email));
            }
            if existing.username == user.username {
                return Err(RepositoryError::Conflict(IdentifierField::Username));
            }
            if user.phone.is_some() && existing.phone == user.phone {
                return Err(RepositoryError::Conflict(IdentifierField::Phone));
            }
        }

        let record = UserRecord {
            user_id: Uuid::new_v4(),
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            email: user.email,
            phone: user.phone,
            password_hash: user.password_hash,
            is_active: true,
            last_login_at: None,
            created_at: self.clock.now(),
        };

        if let Some(m) = &self.default_membership {
            tables.memberships.insert(record.user_id, m.clone());
        }
        tables.users.insert(record.user_id, record.clone());
        Ok(record)
    }

    async fn record_login(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        let mut tables = self.tables.write().map_err(poisoned)?;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.last_login_at = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::utils::password::PasswordHashString;

    fn new_user(email: &str, username: &str, phone: Option<&str>) -> NewUser {
        NewUser {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            username: username.to_string(),
            email: email.to_string(),
            phone: phone.map(str::to_string),
            password_hash: PasswordHashString::new("$argon2id$stub".to_string()),
        }
    }

    #[tokio::test]
    async fn identifier_matches_email_or_username() {
        let repo = InMemoryUserRepository::new(Arc::new(SystemClock));
        let created = repo
            .create_user(new_user("grace@example.com", "grace", None))
            .await
            .unwrap();

        let by_email = repo.find_by_identifier("GRACE@example.com").await.unwrap();
        let by_username = repo.find_by_identifier("grace").await.unwrap();
        assert_eq!(by_email.map(|u| u.user_id), Some(created.user_id));
        assert_eq!(by_username.map(|u| u.user_id), Some(created.user_id));
        assert!(repo.find_by_identifier("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_taken_identifiers() {
        let repo = InMemoryUserRepository::new(Arc::new(SystemClock));
        repo.create_user(new_user("a@example.com", "a", Some("+14155550100")))
            .await
            .unwrap();

        let dup_phone = repo
            .create_user(new_user("b@example.com", "b", Some("+14155550100")))
            .await;
        assert!(matches!(
            dup_phone,
            Err(RepositoryError::Conflict(IdentifierField::Phone))
        ));
        assert!(repo.exists_by_username("a").await.unwrap());
    }
}
