//! Guard Gateway
//!
//! Fronts the guard services behind a single HTTP API. Health of every
//! backend is tracked in the background and requests are routed to the
//! service named in `service_type`.
//!
//! ## Configuration
//!
//! - `GUARD_GATEWAY_CONFIG`: path to the TOML file (default `gateway.toml`,
//!   built-in defaults when absent)
//! - `GUARD_GATEWAY_BIND`, `GUARD_GATEWAY_PORT`, `GUARD_GATEWAY_HEALTH_INTERVAL`,
//!   `GUARD_GATEWAY_MAX_CONCURRENT_CHECKS`, `<SERVICE>_URL`: overrides
//! - `GUARD_GATEWAY_LOG_JSON=true`: JSON log output

use std::sync::Arc;
use anyhow::{Context, Result};
use gg_api::create_router;
use gg_config::GatewayConfig;
use gg_router::GuardGateway;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting Guard Gateway v{}", env!("CARGO_PKG_VERSION"));

    // 1. Configuration
    let config_path = std::env::var("GUARD_GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());
    let mut config = GatewayConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    config
        .apply_env_overrides()
        .context("invalid configuration override")?;

    // 2. Metrics recorder
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, /metrics disabled");
            None
        }
    };

    // 3. Gateway: registry, monitor, dispatcher, priming sweep
    let gateway = Arc::new(
        GuardGateway::initialize(&config)
            .await
            .context("failed to initialize gateway")?,
    );
    log_startup_summary(&config, &gateway);

    // 4. HTTP API
    let app = create_router(gateway.clone(), metrics_handle);
    let addr = config.server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    // 5. Stop the monitor and release backend connections
    gateway.shutdown().await;
    info!("Guard Gateway stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("GUARD_GATEWAY_LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn log_startup_summary(config: &GatewayConfig, gateway: &GuardGateway) {
    info!("=== Guard Gateway Startup Summary ===");
    info!(
        "  Health interval: {}s, max concurrent checks: {}",
        config.monitor.interval_secs, config.monitor.max_concurrent_checks
    );
    for (name, health) in gateway.health_snapshot() {
        info!("  {}: {}", name, health.status.as_str());
    }
    info!("=====================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
