//! Signed, time-bounded identity tokens.
//!
//! Tokens are compact HS256 JWTs. Verification pins the algorithm, so a token
//! whose header names `none`, an asymmetric algorithm, or another HMAC
//! variant is rejected before its signature is even considered.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthSecret;
use crate::error::{AuthError, Result};

/// Lifetime of an issued token.
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Clock-skew tolerance applied to time-bound claims.
pub const CLOCK_LEEWAY_SECS: u64 = 5;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by an identity token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User identifier.
    pub sub: Uuid,
    /// Username at issue time.
    pub name: String,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    pub exp: i64,
}

/// Issues and validates identity tokens under one signing key.
#[derive(Clone, Debug)]
pub struct TokenService {
    secret: AuthSecret,
    validity: Duration,
    leeway_secs: u64,
}

impl TokenService {
    /// Creates a service with the reference validity window and leeway.
    pub fn new(secret: AuthSecret) -> Self {
        Self {
            secret,
            validity: TOKEN_VALIDITY,
            leeway_secs: CLOCK_LEEWAY_SECS,
        }
    }

    /// Overrides the token lifetime.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Configured clock-skew leeway in seconds.
    pub fn leeway_secs(&self) -> u64 {
        self.leeway_secs
    }

    /// Issues a token for `user_id` valid from now.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if encoding fails.
    pub fn issue(&self, user_id: Uuid, username: &str) -> Result<String> {
        self.issue_at(user_id, username, SystemTime::now())
    }

    /// Issues a token as if the current time were `now`.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if encoding fails.
    pub fn issue_at(&self, user_id: Uuid, username: &str, now: SystemTime) -> Result<String> {
        let iat = unix_seconds(now);
        let exp = iat.saturating_add(i64::try_from(self.validity.as_secs()).unwrap_or(i64::MAX));

        let claims = TokenClaims {
            sub: user_id,
            name: username.to_string(),
            iat,
            exp,
        };

        encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("failed to encode token: {e}")))
    }

    /// Validates `token` and returns its claims.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] for any defect: malformed input,
    /// unexpected algorithm, bad signature, or a time bound outside the leeway.
    pub fn validate(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let claims = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "expired",
                ErrorKind::InvalidSignature => "bad signature",
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => "unexpected algorithm",
                _ => "malformed",
            };
            tracing::debug!(reason, "token rejected");
            AuthError::InvalidToken
        })?;

        let now = unix_seconds(SystemTime::now());
        let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);
        if claims.iat > now.saturating_add(leeway) {
            tracing::debug!(reason = "not yet valid", "token rejected");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}

fn unix_seconds(t: SystemTime) -> i64 {
    let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
