// ABOUTME: Workbench server entry point
// ABOUTME: Wires config, Docker runtime, routers, middleware, and graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{http::Method, Extension, Router};
use clap::Parser;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use workbench_api::AppState;
use workbench_sandboxes::{ContainerManager, DockerRuntime};

mod config;
mod error;
mod middleware;

use config::Config;
use middleware::rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};

#[derive(Parser)]
#[command(name = "workbench", about = "Sandboxed workspace server")]
struct Args {
    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let runtime = DockerRuntime::connect()
        .await
        .context("failed to connect to the container runtime")?;
    let containers = ContainerManager::new(Arc::new(runtime), config.sandbox_config());

    // Restarts must not accumulate orphaned containers
    containers.reconcile_startup().await;

    let state = AppState::new(containers.clone());
    workbench_terminal::session::start_sweep_task(state.gateway.sessions.clone());
    workbench_preview::session::start_sweep_task(state.proxy.sessions.clone());

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<axum::http::HeaderValue>()
                .context("invalid CORS origin")?,
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", workbench_api::create_router(state))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(Extension(RateLimitLayer::new(RateLimitConfig::default())))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Workbench server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped; cleaning up containers");
    containers.stop_all().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
