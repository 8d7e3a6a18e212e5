//! HTTP/JSON surface.
//!
//! Routes mirror the gRPC methods and call the same [`Handlers`]:
//!
//! | Route                 | RPC           |
//! |-----------------------|---------------|
//! | `POST /v1/auth/login` | `Login`       |
//! | `GET /v1/health`      | `HealthCheck` |
//! | `GET /v1/auth/me`     | `CurrentUser` |
//!
//! Errors use the grpc-gateway body shape, `{"code": <grpc code>, "message": ...}`.

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tonic::Code;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::AuthError;
use crate::gate::rest::require_auth;
use crate::gate::{AuthorizationGate, Principal};
use crate::service::Handlers;

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// gRPC status code.
    pub code: i32,
    /// Caller-safe message.
    pub message: String,
}

impl ApiError {
    fn http_status(&self) -> StatusCode {
        match Code::from(self.code) {
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self {
            code: err.code() as i32,
            message: err.public_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self)).into_response()
    }
}

/// `POST /v1/auth/login` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginBody {
    /// Username or email.
    pub username: String,
    /// Password.
    pub password: String,
}

/// `POST /v1/auth/login` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenBody {
    /// Signed bearer token.
    pub token: String,
}

/// `GET /v1/health` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthBody {
    /// Liveness status.
    pub status: String,
}

/// `GET /v1/auth/me` response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUserBody {
    /// User identifier.
    pub user_id: String,
    /// Username carried by the token.
    pub username: String,
    /// Token issued-at, seconds since epoch.
    pub issued_at: i64,
    /// Token expiry, seconds since epoch.
    pub expires_at: i64,
}

async fn login(
    State(handlers): State<Handlers>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<TokenBody>, ApiError> {
    let Json(body) = body.map_err(|e| AuthError::InvalidArgument(e.body_text()))?;
    let token = handlers.login(&body.username, &body.password).await?;
    Ok(Json(TokenBody { token }))
}

async fn health(State(handlers): State<Handlers>) -> Json<HealthBody> {
    Json(HealthBody {
        status: handlers.health().to_string(),
    })
}

async fn current_user(principal: Option<Extension<Principal>>) -> Result<Json<CurrentUserBody>, ApiError> {
    let Extension(principal) = principal.ok_or(AuthError::Unauthenticated)?;
    let claims = principal.claims();
    Ok(Json(CurrentUserBody {
        user_id: claims.sub.to_string(),
        username: claims.name.clone(),
        issued_at: claims.iat,
        expires_at: claims.exp,
    }))
}

async fn not_found() -> ApiError {
    ApiError {
        code: Code::NotFound as i32,
        message: "not found".to_string(),
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(600))
}

/// Builds the HTTP router.
///
/// `docs_dir` is mounted under `/swagger/` when given; the caller decides
/// whether documentation is exposed at all.
pub fn router(handlers: Handlers, gate: AuthorizationGate, docs_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/v1/auth/login", post(login))
        .route("/v1/health", get(health))
        .route("/v1/auth/me", get(current_user))
        .with_state(handlers);

    if let Some(dir) = docs_dir {
        router = router.nest_service("/swagger", ServeDir::new(dir));
    }

    router
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(gate, require_auth))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
}
