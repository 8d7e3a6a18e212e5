//! User registration and password authentication.
//!
//! Passwords are hashed with Argon2id at the library's default cost on the
//! blocking thread pool, so a slow hash never stalls the async workers.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AuthError, Field, Result, StoreError};

/// Postgres record store.
pub mod postgres;

/// Record store seam and the in-process implementation.
pub mod store;

pub use postgres::PgUserStore;
pub use store::{MemoryUserStore, UserRecord, UserStore};

/// Verified against when the identity is unknown, so both failure paths cost one hash.
///
/// Same algorithm and parameters as [`Argon2::default`]; matches no password.
const DECOY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$FVsVYkGa8Kwy7jjEcAcKKA$oUBid40obqkFlh9zRiFd27uQDlTog7k8MEaerzDT3FI";

/// Identity returned by a successful [`CredentialStore::authenticate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// User identifier.
    pub id: Uuid,
    /// Stored username.
    pub username: String,
}

/// Owns user records: uniqueness, password hashing and verification.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn UserStore>,
}

impl CredentialStore {
    /// Creates a credential store over `store`.
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Registers a new user and returns its identifier.
    ///
    /// # Errors
    /// - [`AuthError::AlreadyExists`] naming the conflicting field
    /// - [`AuthError::Persistence`] on store failure
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Uuid> {
        // Fast path only; the store's unique constraints are authoritative.
        if self
            .store
            .find_by_username(username)
            .await
            .map_err(|e| store_failure("find_by_username", e))?
            .is_some()
        {
            return Err(AuthError::AlreadyExists(Field::Username));
        }

        if self
            .store
            .find_by_email(email)
            .await
            .map_err(|e| store_failure("find_by_email", e))?
            .is_some()
        {
            return Err(AuthError::AlreadyExists(Field::Email));
        }

        let password_hash = hash_password(password.to_owned()).await?;
        let id = Uuid::new_v4();

        self.store
            .insert(UserRecord {
                id,
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .map_err(|e| store_failure("insert", e))?;

        tracing::info!(user_id = %id, username, "user registered");
        Ok(id)
    }

    /// Checks `password` for the user whose username or email is `identity`.
    ///
    /// # Errors
    /// - [`AuthError::InvalidCredentials`] for an unknown identity or a wrong password
    /// - [`AuthError::Persistence`] on store failure
    pub async fn authenticate(&self, identity: &str, password: &str) -> Result<AuthenticatedUser> {
        let record = self
            .store
            .find_by_username_or_email(identity)
            .await
            .map_err(|e| store_failure("find_by_username_or_email", e))?;

        let Some(record) = record else {
            let _ = verify_password(DECOY_HASH.to_owned(), password.to_owned()).await;
            tracing::debug!(reason = "unknown identity", "login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(record.password_hash, password.to_owned()).await? {
            tracing::debug!(user_id = %record.id, reason = "wrong password", "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(AuthenticatedUser {
            id: record.id,
            username: record.username,
        })
    }
}

fn store_failure(op: &'static str, err: StoreError) -> AuthError {
    if let StoreError::Backend(source) = &err {
        tracing::error!(op, error = %source, "user store failure");
    }
    AuthError::from(err)
}

async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("failed to hash password: {e}")))
    })
    .await
    .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
}

// Comparison of the derived output is constant-time inside `password-hash`.
async fn verify_password(hash: String, password: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is unparseable");
            false
        }
    })
    .await
    .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))
}
