//! Dual-listener process lifecycle.
//!
//! `Starting → Running → Draining → Stopped`. Both listeners are bound before
//! either serves. The first OS signal or listener failure moves the process
//! to draining; a single shutdown notification fans out to whichever
//! listeners are still up, each of which gets the grace period to finish
//! in-flight work. Connections still open after that are closed through the
//! listener's cancellation token, and a serve loop that still has not
//! returned is aborted.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::conn::{GuardedListener, GuardedStream};
use crate::error::StartupError;
use crate::gate::rpc::GrpcAuthLayer;
use crate::gate::AuthorizationGate;
use crate::proto::identity_service_server::IdentityServiceServer;
use crate::rest;
use crate::service::{Handlers, IdentityServiceImpl};

/// Default drain window.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long a serve loop gets to return once its connections are closed.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

const GRPC: &str = "grpc";
const HTTP: &str = "http";

type ServeTask = JoinHandle<Result<(), StartupError>>;

/// What moved the orchestrator out of `Running`.
enum Trigger {
    Signal,
    Listener(&'static str, Result<(), StartupError>),
}

/// A spawned serve loop and the token that closes its connections.
struct Served {
    listener: &'static str,
    task: ServeTask,
    connections: CancellationToken,
}

/// Owns both bound listeners and runs them to completion.
pub struct ServerOrchestrator {
    grpc: TcpListener,
    http: TcpListener,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
    handlers: Handlers,
    gate: AuthorizationGate,
    grace: Duration,
    docs_dir: Option<PathBuf>,
}

impl ServerOrchestrator {
    /// Binds both listeners.
    ///
    /// Nothing is served until [`run`](Self::run) or
    /// [`run_until`](Self::run_until) is called.
    ///
    /// # Errors
    /// [`StartupError::Bind`] if either address cannot be bound. No listener
    /// is left open in that case.
    pub async fn bind(
        grpc_addr: SocketAddr,
        http_addr: SocketAddr,
        handlers: Handlers,
        gate: AuthorizationGate,
    ) -> Result<Self, StartupError> {
        info!(phase = "starting", %grpc_addr, %http_addr, "binding listeners");

        let grpc = bind_listener(grpc_addr).await?;
        let http = bind_listener(http_addr).await?;

        let grpc_addr = grpc
            .local_addr()
            .map_err(|source| StartupError::Bind { addr: grpc_addr, source })?;
        let http_addr = http
            .local_addr()
            .map_err(|source| StartupError::Bind { addr: http_addr, source })?;

        Ok(Self {
            grpc,
            http,
            grpc_addr,
            http_addr,
            handlers,
            gate,
            grace: DEFAULT_GRACE_PERIOD,
            docs_dir: None,
        })
    }

    /// Sets the drain window.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Serves `dir` under `/swagger/` on the HTTP listener.
    pub fn with_docs(mut self, dir: PathBuf) -> Self {
        self.docs_dir = Some(dir);
        self
    }

    /// Bound RPC address (useful when binding port 0).
    pub fn grpc_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    /// Bound HTTP address (useful when binding port 0).
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Runs until SIGINT/SIGTERM or a listener failure.
    ///
    /// # Errors
    /// See [`run_until`](Self::run_until).
    pub async fn run(self) -> Result<(), StartupError> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until `signal` resolves or a listener failure.
    ///
    /// # Errors
    /// [`StartupError::Listener`] when a listener's serve loop failed or
    /// exited on its own. A signal-triggered shutdown returns `Ok(())`.
    pub async fn run_until<F>(self, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            grpc,
            http,
            grpc_addr,
            http_addr,
            handlers,
            gate,
            grace,
            docs_dir,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let router = rest::router(handlers.clone(), gate.clone(), docs_dir);

        let grpc_connections = CancellationToken::new();
        let grpc = Served {
            listener: GRPC,
            task: tokio::spawn(serve_grpc(
                grpc,
                handlers,
                gate,
                shutdown_rx.clone(),
                grpc_connections.clone(),
            )),
            connections: grpc_connections,
        };

        let http_connections = CancellationToken::new();
        let http = Served {
            listener: HTTP,
            task: tokio::spawn(serve_http(
                http,
                router,
                shutdown_rx,
                http_connections.clone(),
            )),
            connections: http_connections,
        };

        info!(phase = "running", %grpc_addr, %http_addr, "gateway listening");

        supervise(grpc, http, signal, shutdown_tx, grace).await
    }
}

/// Waits for the first trigger, then drains both listeners.
async fn supervise<F>(
    mut grpc: Served,
    mut http: Served,
    signal: F,
    shutdown: watch::Sender<bool>,
    grace: Duration,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send,
{
    let trigger = tokio::select! {
        () = signal => Trigger::Signal,
        joined = &mut grpc.task => Trigger::Listener(GRPC, flatten(GRPC, joined)),
        joined = &mut http.task => Trigger::Listener(HTTP, flatten(HTTP, joined)),
    };

    info!(phase = "draining", grace_secs = grace.as_secs(), "shutting down listeners");
    let _ = shutdown.send(true);

    let outcome = match trigger {
        Trigger::Signal => {
            tokio::join!(drain(grpc, grace), drain(http, grace));
            Ok(())
        }
        Trigger::Listener(listener, result) => {
            let (failed, survivor) = if listener == GRPC {
                (grpc, http)
            } else {
                (http, grpc)
            };
            // Its serve loop is gone; close whatever connections it left behind.
            failed.connections.cancel();
            drain(survivor, grace).await;

            Err(result.err().unwrap_or(StartupError::Listener {
                listener,
                message: "exited unexpectedly".to_string(),
            }))
        }
    };

    match &outcome {
        Ok(()) => info!(phase = "stopped", "gateway stopped"),
        Err(err) => error!(phase = "stopped", error = %err, "gateway stopped on listener failure"),
    }
    outcome
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // A dropped sender also means stop.
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn serve_grpc(
    listener: TcpListener,
    handlers: Handlers,
    gate: AuthorizationGate,
    shutdown: watch::Receiver<bool>,
    connections: CancellationToken,
) -> Result<(), StartupError> {
    let incoming = TcpListenerStream::new(listener).map(move |accepted| {
        accepted.map(|io| GuardedStream::new(io, connections.clone()))
    });

    Server::builder()
        .trace_fn(|req| tracing::info_span!("grpc", path = %req.uri().path()))
        .layer(GrpcAuthLayer::new(gate))
        .add_service(IdentityServiceServer::new(IdentityServiceImpl::new(handlers)))
        .serve_with_incoming_shutdown(incoming, wait_for_shutdown(shutdown))
        .await
        .map_err(|e| StartupError::Listener {
            listener: GRPC,
            message: e.to_string(),
        })
}

async fn serve_http(
    listener: TcpListener,
    router: axum::Router,
    shutdown: watch::Receiver<bool>,
    connections: CancellationToken,
) -> Result<(), StartupError> {
    axum::serve(GuardedListener::new(listener, connections), router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .map_err(|e| StartupError::Listener {
            listener: HTTP,
            message: e.to_string(),
        })
}

fn flatten(
    listener: &'static str,
    joined: Result<Result<(), StartupError>, JoinError>,
) -> Result<(), StartupError> {
    joined.map_err(|e| StartupError::Listener {
        listener,
        message: format!("task failed: {e}"),
    })?
}

/// Waits up to `grace` for a listener to finish.
///
/// After the window its connections are closed; a serve loop that still
/// does not return within [`FORCE_CLOSE_WAIT`] is aborted.
async fn drain(served: Served, grace: Duration) {
    let Served {
        listener,
        mut task,
        connections,
    } = served;

    let joined = match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(listener, "drain window elapsed, closing remaining connections");
            connections.cancel();
            match tokio::time::timeout(FORCE_CLOSE_WAIT, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(listener, "listener ignored connection close, aborting");
                    task.abort();
                    return;
                }
            }
        }
    };

    match flatten(listener, joined) {
        Ok(()) => info!(listener, "listener drained"),
        Err(e) => warn!(listener, error = %e, "listener failed while draining"),
    }
    connections.cancel();
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still can.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        () = terminate => {
            info!("Received terminate signal");
        },
    }
}
