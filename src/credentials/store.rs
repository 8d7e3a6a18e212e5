use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Field, StoreError};

/// A persisted user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    /// Immutable random identifier assigned at registration.
    pub id: Uuid,
    /// Unique, case-sensitive login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// PHC-formatted salted password hash.
    pub password_hash: String,
    /// When the record was created.
    pub created_at: OffsetDateTime,
}

/// Record store for users.
///
/// Implementations must enforce username and email uniqueness atomically on
/// [`insert`](UserStore::insert), reporting a conflict as
/// [`StoreError::UniqueViolation`] no matter how many writers race.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Finds the record whose username or email equals `identity`.
    async fn find_by_username_or_email(
        &self,
        identity: &str,
    ) -> Result<Option<UserRecord>, StoreError>;

    /// Finds the record with exactly this username.
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Finds the record with exactly this email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Inserts a new record.
    async fn insert(&self, record: UserRecord) -> Result<(), StoreError>;
}

/// In-process user store.
///
/// Uniqueness check and insert happen under one write lock.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, UserRecord>>>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored users.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username_or_email(
        &self,
        identity: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        // A username match wins over an email match.
        let by_username = users.values().find(|u| u.username == identity);
        Ok(by_username
            .or_else(|| users.values().find(|u| u.email == identity))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.username == record.username) {
            return Err(StoreError::UniqueViolation(Field::Username));
        }

        if users.values().any(|u| u.email == record.email) {
            return Err(StoreError::UniqueViolation(Field::Email));
        }

        if users.contains_key(&record.id) {
            return Err(StoreError::backend(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("duplicate user id {}", record.id),
            )));
        }

        users.insert(record.id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str, email: &str) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn lookup_by_either_field() {
        let store = MemoryUserStore::new();
        let alice = record("alice", "alice@example.com");
        store.insert(alice.clone()).await.unwrap();

        assert_eq!(
            store.find_by_username_or_email("alice").await.unwrap(),
            Some(alice.clone())
        );
        assert_eq!(
            store
                .find_by_username_or_email("alice@example.com")
                .await
                .unwrap(),
            Some(alice)
        );
        assert_eq!(store.find_by_username_or_email("Alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_enforces_both_unique_fields() {
        let store = MemoryUserStore::new();
        store
            .insert(record("alice", "alice@example.com"))
            .await
            .unwrap();

        let err = store
            .insert(record("alice", "other@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(Field::Username)));

        let err = store
            .insert(record("bob", "alice@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(Field::Email)));

        assert_eq!(store.user_count().await, 1);
    }
}
