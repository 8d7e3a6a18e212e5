use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Request, Response};
use tonic::Code;
use tower::{Layer, Service};

use super::{AuthorizationGate, Operation};
use crate::error::AuthError;

/// Tower layer running the [`AuthorizationGate`] in front of gRPC routes.
#[derive(Clone, Debug)]
pub struct GrpcAuthLayer {
    gate: AuthorizationGate,
}

impl GrpcAuthLayer {
    /// Wraps services with `gate`.
    pub fn new(gate: AuthorizationGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuth {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Service produced by [`GrpcAuthLayer`].
#[derive(Clone, Debug)]
pub struct GrpcAuth<S> {
    inner: S,
    gate: AuthorizationGate,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GrpcAuth<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let decision = self.gate.authorize(
            Operation::Rpc {
                path: req.uri().path(),
            },
            req.headers().get(AUTHORIZATION),
        );

        match decision {
            Ok(Some(principal)) => {
                req.extensions_mut().insert(principal);
            }
            Ok(None) => {}
            Err(err) => {
                let response = unauthenticated(&err);
                return Box::pin(async move { Ok(response) });
            }
        }

        // The ready service is the one that must handle this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(inner.call(req))
    }
}

/// Trailers-only gRPC response carrying `UNAUTHENTICATED`.
fn unauthenticated<B: Default>(err: &AuthError) -> Response<B> {
    let mut response = Response::new(B::default());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert("grpc-status", HeaderValue::from(Code::Unauthenticated as i32));
    if let Ok(message) = HeaderValue::from_str(&err.public_message()) {
        headers.insert("grpc-message", message);
    }
    response
}
