//! Vigil engine node binary.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vigil_node::api;
use vigil_node::config::VigilConfig;
use vigil_node::engine::Engine;
use vigil_node::events::BroadcastGateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vigil_node=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Vigil engine node v{}", env!("CARGO_PKG_VERSION"));

    let config = match VigilConfig::from_file("config/default") {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "No config file found, using built-in defaults");
            VigilConfig::default()
        }
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    info!(
        environment = %config.platform.environment,
        deployment_id = %config.platform.deployment_id,
        "Configuration loaded"
    );

    if config.metrics_enabled() {
        let metrics_addr: std::net::SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("Invalid metrics listen address")?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(metrics_addr = %metrics_addr, "Prometheus exporter listening");
    }

    let gateway = if config.nats_enabled() {
        let url = config
            .nats
            .server
            .as_deref()
            .context("NATS enabled but no server configured")?;
        BroadcastGateway::connect(url, config.nats.publish_retries).await?
    } else {
        info!("Broadcast fan-out disabled, events captured in memory");
        let (gateway, _sink) = BroadcastGateway::in_memory();
        gateway
    };

    let listen_addr = config.listen_addr().context("Invalid listen address")?;
    let engine = Arc::new(Engine::new(config, gateway).context("Failed to build engine")?);

    Arc::clone(&engine).start_sweeper();

    let router = api::build_router(engine);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!(listen_addr = %listen_addr, "Engine API listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(api::shutdown_signal())
    .await
    .context("Server error")?;

    info!("Vigil engine node stopped");
    Ok(())
}
