use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::{AuthorizationGate, Operation};
use crate::rest::ApiError;

/// Axum middleware applying the [`AuthorizationGate`] to every HTTP request.
///
/// Install with `axum::middleware::from_fn_with_state(gate, require_auth)`.
pub async fn require_auth(
    State(gate): State<AuthorizationGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let decision = gate.authorize(
        Operation::Http {
            method: request.method().as_str(),
            path: request.uri().path(),
        },
        request.headers().get(AUTHORIZATION),
    );

    match decision {
        Ok(Some(principal)) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => ApiError::from(err).into_response(),
    }
}
