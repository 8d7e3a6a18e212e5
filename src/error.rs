//! Error types for the identity gateway.

use std::fmt;
use std::net::SocketAddr;

use tonic::{Code, Status};

/// Unique field of a user record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// The login name.
    Username,
    /// The email address.
    Email,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Username => f.write_str("username"),
            Field::Email => f.write_str("email"),
        }
    }
}

/// Failures raised by a user record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store rejected a write because a unique field is already taken.
    #[error("unique constraint violated on {0}")]
    UniqueViolation(Field),

    /// Any other backend failure (connection, I/O, query).
    #[error("store backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps an arbitrary backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Errors surfaced by the credential, token and authorization layers.
///
/// Credential and token variants are deliberately coarse: callers see the
/// same error for an unknown identity and a wrong password, and for every
/// kind of token defect.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown identity or wrong password.
    #[error("invalid username/email or password")]
    InvalidCredentials,

    /// Registration conflict on a unique field.
    #[error("{0} already exists")]
    AlreadyExists(Field),

    /// Malformed, expired, wrongly-signed or wrong-algorithm token.
    #[error("invalid token")]
    InvalidToken,

    /// No usable bearer credential was presented.
    #[error("missing or malformed authorization credential")]
    Unauthenticated,

    /// A request field failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The record store failed.
    #[error("persistence failure")]
    Persistence(#[source] StoreError),

    /// Token signing, password hashing or a worker task failed.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(field) => AuthError::AlreadyExists(field),
            other => AuthError::Persistence(other),
        }
    }
}

impl AuthError {
    /// The gRPC status code this error is reported with on either surface.
    pub fn code(&self) -> Code {
        match self {
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::Unauthenticated => {
                Code::Unauthenticated
            }
            AuthError::AlreadyExists(_) => Code::AlreadyExists,
            AuthError::InvalidArgument(_) => Code::InvalidArgument,
            AuthError::Persistence(_) | AuthError::Internal(_) => Code::Internal,
        }
    }

    /// Message safe to hand to a remote caller.
    ///
    /// Authorization failures all read the same, and internal failures carry
    /// no backend detail.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidToken | AuthError::Unauthenticated => "unauthenticated".to_string(),
            AuthError::Persistence(_) | AuthError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        Status::new(err.code(), err.public_message())
    }
}

/// Fatal boot failures. None of these are recovered from.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No signing secret is configured outside development.
    #[error("JWT_SECRET is not set")]
    MissingSecret,

    /// The record store could not be reached.
    #[error("database connection failed: {0}")]
    Database(#[source] sqlx::Error),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// A listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// A listener's serve loop failed while running.
    #[error("{listener} listener failed: {message}")]
    Listener {
        /// Which listener failed.
        listener: &'static str,
        /// Rendered cause.
        message: String,
    },
}

/// Convenient result alias for credential and token operations.
pub type Result<T> = std::result::Result<T, AuthError>;
