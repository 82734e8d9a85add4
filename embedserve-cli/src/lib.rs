//! HTTP server and CLI entrypoint wiring for embedserve.
use std::sync::{Arc, OnceLock};

use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

use embedserve::EngineArray;

pub mod cli;
pub mod config;
pub mod error;
pub mod http;

use cli::Cli;
use config::LoggingConfig;
use error::ApiError;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

fn install_prometheus() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder")
        })
        .clone()
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Parses CLI flags, loads the configured models, and serves HTTP until a
/// shutdown signal arrives.
pub async fn run() -> Result<(), ApiError> {
    let cli = Cli::parse();
    let server_config = cli.into_server_config()?;

    init_logging(&server_config.logging);
    let prometheus_handle = install_prometheus();

    let engines = EngineArray::new(server_config.models)?;
    engines.start_all().await?;
    tracing::info!(models = ?engines.names(), "models loaded");

    let state = Arc::new(http::AppState {
        engines,
        api_key: server_config.api_key,
        prometheus_handle,
    });
    let router = http::build_router(state.clone());

    let addr: std::net::SocketAddr = format!("{}:{}", server_config.host, server_config.port)
        .parse()
        .map_err(|e| ApiError::Config(format!("invalid host/port: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::Config(format!("binding {addr}: {e}")))?;

    tracing::info!(%addr, "embedserve listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Config(format!("server error: {e}")))?;

    state.engines.stop_all().await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
