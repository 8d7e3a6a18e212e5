use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;
use uuid::Uuid;

use super::store::{UserRecord, UserStore};
use crate::error::{Field, StartupError, StoreError};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const USERNAME_CONSTRAINT: &str = "users_username_key";
const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(sqlx::FromRow)]
struct UserRow {
    uuid: Uuid,
    username: String,
    email: String,
    hashed_password: String,
    created_at: OffsetDateTime,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.uuid,
            username: row.username,
            email: row.email,
            password_hash: row.hashed_password,
            created_at: row.created_at,
        }
    }
}

/// Postgres-backed user store over a shared connection pool.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Connects a pool of at most `max_connections`.
    ///
    /// # Errors
    /// Returns [`StartupError::Database`] if the first connection fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StartupError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(StartupError::Database)?;
        Ok(Self { pool })
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    /// Returns [`StartupError::Migration`] if any migration fails.
    pub async fn migrate(&self) -> Result<(), StartupError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(StartupError::Migration)?;
        tracing::info!("Migrations ran successfully");
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        sql: &'static str,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query_as::<_, UserRow>(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(UserRecord::from))
            .map_err(StoreError::backend)
    }
}

/// The user-facing field guarded by a unique constraint, if it is one of ours.
fn field_for_constraint(constraint: Option<&str>) -> Option<Field> {
    match constraint? {
        USERNAME_CONSTRAINT => Some(Field::Username),
        EMAIL_CONSTRAINT => Some(Field::Email),
        _ => None,
    }
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            if let Some(field) = field_for_constraint(db.constraint()) {
                return StoreError::UniqueViolation(field);
            }
        }
    }
    StoreError::backend(err)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username_or_email(
        &self,
        identity: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.fetch_one_where(
            "SELECT uuid, username, email, hashed_password, created_at \
             FROM users WHERE username = $1 OR email = $1 \
             ORDER BY (username = $1) DESC LIMIT 1",
            identity,
        )
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.fetch_one_where(
            "SELECT uuid, username, email, hashed_password, created_at \
             FROM users WHERE username = $1",
            username,
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.fetch_one_where(
            "SELECT uuid, username, email, hashed_password, created_at \
             FROM users WHERE email = $1",
            email,
        )
        .await
    }

    async fn insert(&self, record: UserRecord) -> Result<(), StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO users (uuid, username, email, hashed_password, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id)
        .bind(&record.username)
        .bind(&record.email)
        .bind(&record.password_hash)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error);

        match inserted {
            // Postgres reports whichever constraint it checked first; a taken
            // username is still the conflict to name.
            Err(StoreError::UniqueViolation(Field::Email)) => {
                let field = match self.find_by_username(&record.username).await? {
                    Some(_) => Field::Username,
                    None => Field::Email,
                };
                Err(StoreError::UniqueViolation(field))
            }
            other => other.map(|_| ()),
        }
    }
}
