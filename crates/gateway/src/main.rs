//! pgEdge RAG Server
//!
//! Multi-tenant retrieval-augmented generation over PostgreSQL +
//! pgvector: per-pipeline hybrid retrieval (cosine similarity fused
//! with in-process BM25) driving a chat-completion provider, served
//! over JSON or SSE.

use clap::Parser;
use pgrag_common::config::AppConfig;
use pgrag_gateway::pipeline::PipelineManager;
use pgrag_gateway::{create_router, handlers, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pgedge-rag-server",
    version,
    about = "Retrieval-augmented generation server for PostgreSQL + pgvector"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the OpenAPI service description and exit
    #[arg(long)]
    openapi: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.openapi {
        println!("{}", serde_json::to_string_pretty(&handlers::openapi::document())?);
        return Ok(());
    }

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("starting pgEdge RAG server v{}", pgrag_common::VERSION);

    let config_path = AppConfig::discover(cli.config)?;
    info!(path = %config_path.display(), "loading configuration");
    let config = AppConfig::load(&config_path)?;

    let manager = Arc::new(PipelineManager::from_config(&config).await?);
    info!(pipelines = manager.list().await.len(), "pipelines ready");

    let state = AppState {
        manager: manager.clone(),
    };
    let app = create_router(state, config.server.cors.as_ref());

    let addr: SocketAddr = format!("{}:{}", config.server.listen_address, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.close().await;
    info!("server shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting shutdown"),
        _ = terminate => info!("received SIGTERM, starting shutdown"),
    }
}
