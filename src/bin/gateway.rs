use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use identity_gateway::credentials::{CredentialStore, MemoryUserStore, PgUserStore, UserStore};
use identity_gateway::{
    AuthorizationGate, GatewayConfig, Handlers, ServerOrchestrator, StartupError, TokenService,
};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Identity gateway serving gRPC and HTTP/JSON", long_about = None)]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "GATEWAY_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// gRPC listen address (overrides GRPC_ADDR)
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// HTTP listen address (overrides HTTP_ADDR)
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(args).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = GatewayConfig::load(args.config)
        .map_err(|e| StartupError::Config(e.to_string()))?;

    if let Some(addr) = args.grpc_addr {
        config.grpc_addr = addr;
    }
    if let Some(addr) = args.http_addr {
        config.http_addr = addr;
    }

    config.validate()?;
    let secret = config.resolve_secret()?;
    info!(?config, "configuration loaded");

    let store: Arc<dyn UserStore> = if config.uses_memory_store() {
        info!("using in-memory user store");
        Arc::new(MemoryUserStore::new())
    } else {
        let store = PgUserStore::connect(&config.database_url, config.db_max_connections)
            .await
            .context("Failed to connect to the user database")?;
        store.migrate().await.context("Failed to apply migrations")?;
        Arc::new(store)
    };

    let tokens = TokenService::new(secret);
    let handlers = Handlers::new(CredentialStore::new(store), tokens.clone());
    let gate = AuthorizationGate::new(tokens, config.env);

    if config.env.is_development() {
        handlers.bootstrap_development_user().await;
    }

    let mut server = ServerOrchestrator::bind(config.grpc_addr, config.http_addr, handlers, gate)
        .await?
        .with_grace_period(config.shutdown_grace());

    if config.env.is_development() {
        server = server.with_docs(config.docs_dir.clone());
    }

    server.run().await?;
    Ok(())
}
