//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use identity_gateway::proto::identity_service_client::IdentityServiceClient;
use identity_gateway::{
    AuthSecret, AuthorizationGate, CredentialStore, Environment, Handlers, MemoryUserStore,
    ServerOrchestrator, TokenService,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

/// Signing key used by every test gateway.
pub const TEST_SECRET: &str = "integration-test-secret";

/// Initialize test tracing (call once at the beginning of tests).
///
/// Only logs from the gateway crate are shown, filtering out HTTP/2 and tower noise.
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("identity_gateway=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// A gateway running on ephemeral loopback ports with an in-memory store.
pub struct TestGateway {
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub handlers: Handlers,
    pub tokens: TokenService,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), identity_gateway::StartupError>>,
}

impl TestGateway {
    pub async fn start(environment: Environment) -> Self {
        init_tracing();

        let tokens = TokenService::new(AuthSecret::new(TEST_SECRET));
        let handlers = Handlers::new(
            CredentialStore::new(Arc::new(MemoryUserStore::new())),
            tokens.clone(),
        );
        let gate = AuthorizationGate::new(tokens.clone(), environment);

        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let server = ServerOrchestrator::bind(loopback, loopback, handlers.clone(), gate)
            .await
            .expect("bind test listeners")
            .with_grace_period(Duration::from_secs(1));

        let grpc_addr = server.grpc_addr();
        let http_addr = server.http_addr();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            grpc_addr,
            http_addr,
            handlers,
            tokens,
            stop: Some(stop),
            task,
        }
    }

    pub fn grpc_url(&self) -> String {
        format!("http://{}", self.grpc_addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.http_addr)
    }

    pub async fn grpc_client(&self) -> IdentityServiceClient<Channel> {
        IdentityServiceClient::connect(self.grpc_url())
            .await
            .expect("Failed to connect to gateway")
    }

    /// Signals shutdown and waits for the orchestrator to stop.
    pub async fn shutdown(mut self) -> Result<(), identity_gateway::StartupError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), &mut self.task)
            .await
            .expect("shutdown exceeded the drain window")
            .expect("orchestrator task panicked")
    }
}

/// `Bearer <token>` request helper for tonic calls.
pub fn bearer<T>(message: T, token: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {token}").parse().expect("ascii token"),
    );
    request
}
