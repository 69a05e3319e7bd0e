//! ComputeGrid Dispatch Server

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use computegrid_dispatcher::{http, AppState, Config, DispatchServiceImpl, IdentityServiceImpl};
use computegrid_kernels::default_registry;

#[derive(Parser, Debug)]
#[command(name = "computegrid-dispatcher")]
#[command(about = "ComputeGrid dispatch server", long_about = None)]
struct Args {
    /// gRPC bind address
    #[arg(long)]
    bind: Option<String>,

    /// HTTP (health/metrics) bind address
    #[arg(long)]
    http_bind: Option<String>,

    /// Number of dispatch workers (defaults to available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum number of queued tasks
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Finished results retained for retrieval
    #[arg(long)]
    result_capacity: Option<usize>,

    /// Secret used to sign bearer tokens
    #[arg(long, env = "COMPUTEGRID_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Bearer token lifetime in seconds
    #[arg(long)]
    token_ttl: Option<u64>,

    /// Accept dispatch calls without a bearer token
    #[arg(long)]
    no_auth: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            bind_addr: self.bind.unwrap_or(defaults.bind_addr),
            http_bind_addr: self.http_bind.unwrap_or(defaults.http_bind_addr),
            worker_count: self.workers.unwrap_or(defaults.worker_count),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            result_capacity: self.result_capacity.unwrap_or(defaults.result_capacity),
            token_secret: self.token_secret.unwrap_or(defaults.token_secret),
            token_ttl_secs: self.token_ttl.unwrap_or(defaults.token_ttl_secs),
            require_auth: !self.no_auth,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Args::parse().into_config();
    let grpc_addr: SocketAddr = config.bind_addr.parse()?;
    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    let state = AppState::from_config(&config, default_registry());
    state.dispatcher.start();

    info!(grpc_addr = %grpc_addr, http_addr = %http_addr, "Starting ComputeGrid dispatcher");

    let dispatch_service = DispatchServiceImpl::new(state.clone()).into_server();
    let identity_service = IdentityServiceImpl::new(state.clone()).into_server();

    let http_router = http::create_router(state);

    let grpc_server = Server::builder()
        .add_service(dispatch_service)
        .add_service(identity_service)
        .serve(grpc_addr);

    let http_listener = TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, http_router);

    info!("gRPC server listening on {}", grpc_addr);
    info!("HTTP server listening on {} (health, metrics)", http_addr);

    tokio::select! {
        result = grpc_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server error");
            }
        }
        result = http_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
