//! Identity gateway.
//!
//! Serves one handler set over gRPC and HTTP/JSON, with a single
//! authorization policy enforced on both surfaces.

#![warn(missing_docs)]

/// Generated protobuf types and gRPC stubs.
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("identity.v1");
}

/// Gateway configuration.
pub mod config;
mod conn;
/// Password-backed user records.
pub mod credentials;
/// Error types.
pub mod error;
/// Cross-protocol authorization.
pub mod gate;
/// HTTP/JSON routes.
pub mod rest;
/// Listener lifecycle.
pub mod server;
/// Shared handler set and the gRPC service.
pub mod service;
/// Signed identity tokens.
pub mod token;

pub use config::{AuthSecret, Environment, GatewayConfig};
pub use credentials::{CredentialStore, MemoryUserStore, PgUserStore, UserStore};
pub use error::{AuthError, Field, Result, StartupError, StoreError};
pub use gate::{AuthorizationGate, Principal};
pub use server::ServerOrchestrator;
pub use service::{Handlers, IdentityServiceImpl};
pub use token::{TokenClaims, TokenService};
