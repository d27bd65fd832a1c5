//! User, role and membership lookups.
//!
//! Account persistence lives outside this service; it is reached only through
//! [`UserRepository`].

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::IdentifierField;
use crate::models::{Membership, NewUser, UserRecord};

pub use memory::InMemoryUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("{0} already taken")]
    Conflict(IdentifierField),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Looks a user up by e-mail (case-insensitive) or username.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>, RepositoryError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>, RepositoryError>;

    async fn find_membership(&self, user_id: Uuid) -> Result<Option<Membership>, RepositoryError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, RepositoryError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, RepositoryError>;

    async fn exists_by_phone(&self, phone: &str) -> Result<bool, RepositoryError>;

    /// Fails with `Conflict` when a unique identifier was taken concurrently.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, RepositoryError>;

    async fn record_login(&self, user_id: Uuid) -> Result<(), RepositoryError>;
}
