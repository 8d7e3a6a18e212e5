//! Cross-protocol authorization.
//!
//! One bypass table ([`BYPASS_RULES`]) and one decision function
//! ([`requires_auth`]) serve both the gRPC adapter ([`rpc`]) and the HTTP
//! adapter ([`rest`]). Each rule names a logical operation together with its
//! path on every surface that exposes it, so the two adapters cannot drift.

use http::HeaderValue;

use crate::config::Environment;
use crate::error::{AuthError, Result};
use crate::token::{TokenClaims, TokenService};

/// HTTP adapter (axum middleware).
pub mod rest;

/// gRPC adapter (tower layer).
pub mod rpc;

/// Fully-qualified gRPC service path prefix.
pub const RPC_SERVICE: &str = "/identity.v1.IdentityService";

const BEARER_PREFIX: &str = "Bearer ";

/// Wire protocol a request arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// gRPC over HTTP/2.
    Rpc,
    /// HTTP/JSON.
    Http,
}

/// A request as seen by the policy.
#[derive(Clone, Copy, Debug)]
pub enum Operation<'a> {
    /// A gRPC call, identified by its `/package.Service/Method` path.
    Rpc {
        /// Method path.
        path: &'a str,
    },
    /// An HTTP request.
    Http {
        /// Request method (`GET`, `POST`, ...).
        method: &'a str,
        /// URI path without the query string.
        path: &'a str,
    },
}

impl Operation<'_> {
    /// Protocol of this operation.
    pub fn protocol(&self) -> Protocol {
        match self {
            Operation::Rpc { .. } => Protocol::Rpc,
            Operation::Http { .. } => Protocol::Http,
        }
    }
}

/// Path matcher for a bypass rule.
#[derive(Clone, Copy, Debug)]
pub enum PathMatch {
    /// The path must equal this string.
    Exact(&'static str),
    /// The path must start with this string.
    Prefix(&'static str),
}

impl PathMatch {
    fn matches(self, path: &str) -> bool {
        match self {
            PathMatch::Exact(expected) => path == expected,
            PathMatch::Prefix(prefix) => path.starts_with(prefix),
        }
    }
}

/// A logical operation that may be reached without a token.
#[derive(Clone, Copy, Debug)]
pub struct BypassRule {
    /// Logical operation name.
    pub name: &'static str,
    /// gRPC method path, if the operation is exposed over gRPC.
    pub rpc: Option<PathMatch>,
    /// HTTP methods and path, if the operation is exposed over HTTP.
    pub http: Option<(&'static [&'static str], PathMatch)>,
    /// Only bypasses in the development environment.
    pub development_only: bool,
}

impl BypassRule {
    fn matches(&self, operation: Operation<'_>) -> bool {
        match operation {
            Operation::Rpc { path } => self.rpc.is_some_and(|m| m.matches(path)),
            Operation::Http { method, path } => self
                .http
                .is_some_and(|(methods, p)| {
                    methods.iter().any(|m| m.eq_ignore_ascii_case(method)) && p.matches(path)
                }),
        }
    }

    fn applies_in(&self, environment: Environment) -> bool {
        !self.development_only || environment.is_development()
    }
}

/// Safe-method reads; HEAD is answered by the GET route.
const READ: &[&str] = &["GET", "HEAD"];

/// Operations exempt from authorization. Everything else needs a bearer token.
pub static BYPASS_RULES: &[BypassRule] = &[
    BypassRule {
        name: "Login",
        rpc: Some(PathMatch::Exact("/identity.v1.IdentityService/Login")),
        http: Some((&["POST"], PathMatch::Exact("/v1/auth/login"))),
        development_only: false,
    },
    BypassRule {
        name: "HealthCheck",
        rpc: Some(PathMatch::Exact("/identity.v1.IdentityService/HealthCheck")),
        http: Some((READ, PathMatch::Exact("/v1/health"))),
        development_only: false,
    },
    BypassRule {
        name: "Documentation",
        rpc: None,
        http: Some((READ, PathMatch::Prefix("/swagger/"))),
        development_only: true,
    },
];

/// The bypass rule matching `operation` in `environment`, if any.
pub fn bypass_rule(operation: Operation<'_>, environment: Environment) -> Option<&'static BypassRule> {
    BYPASS_RULES
        .iter()
        .find(|rule| rule.applies_in(environment) && rule.matches(operation))
}

/// Whether `operation` needs a valid bearer token in `environment`.
pub fn requires_auth(operation: Operation<'_>, environment: Environment) -> bool {
    bypass_rule(operation, environment).is_none()
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
///
/// # Errors
/// Returns [`AuthError::Unauthenticated`] when the value is absent, not
/// visible ASCII, lacks the exact `Bearer ` prefix, or carries an empty token.
pub fn extract_bearer(value: Option<&HeaderValue>) -> Result<&str> {
    let value = value.ok_or(AuthError::Unauthenticated)?;
    let value = value.to_str().map_err(|_| AuthError::Unauthenticated)?;
    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::Unauthenticated),
    }
}

/// Identity established by the gate for the current request.
///
/// Stored in request extensions under its own type; only the gate creates one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    claims: TokenClaims,
}

impl Principal {
    /// Decoded token claims.
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

/// Applies the route policy and token validation to one request.
#[derive(Clone, Debug)]
pub struct AuthorizationGate {
    tokens: TokenService,
    environment: Environment,
}

impl AuthorizationGate {
    /// Creates a gate validating with `tokens` under `environment`'s policy.
    pub fn new(tokens: TokenService, environment: Environment) -> Self {
        Self {
            tokens,
            environment,
        }
    }

    /// Environment the policy is evaluated in.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Decides whether the request may proceed.
    ///
    /// Returns `Ok(None)` for a bypass route and `Ok(Some(principal))` for an
    /// authenticated request.
    ///
    /// # Errors
    /// [`AuthError::Unauthenticated`] or [`AuthError::InvalidToken`].
    pub fn authorize(
        &self,
        operation: Operation<'_>,
        authorization: Option<&HeaderValue>,
    ) -> Result<Option<Principal>> {
        if let Some(rule) = bypass_rule(operation, self.environment) {
            tracing::trace!(rule = rule.name, "bypass route");
            return Ok(None);
        }

        let token = extract_bearer(authorization).inspect_err(|_| {
            tracing::debug!(?operation, "missing or malformed bearer credential");
        })?;

        let claims = self.tokens.validate(token).inspect_err(|_| {
            tracing::debug!(?operation, "bearer token rejected");
        })?;

        Ok(Some(Principal { claims }))
    }
}
