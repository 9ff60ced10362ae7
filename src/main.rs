//! MCP gateway daemon.
//!
//! ```text
//!   tool layer ──▶ Gateway::execute
//!                    ├─ RateLimiter   (daily cap / per-minute wait)
//!                    ├─ AuthManager   (cached, pre-emptively refreshed OAuth)
//!                    └─ CircuitBreaker (per dependency)
//!                         └──▶ third-party API
//!
//!   admin API (/admin/*) ──▶ status of all three
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use mcp_gateway::admin::{self, AppState};
use mcp_gateway::config::{self, GatewayConfig};
use mcp_gateway::lifecycle::shutdown_signal;
use mcp_gateway::observability::{logging, metrics};
use mcp_gateway::Gateway;

#[derive(Parser)]
#[command(name = "mcp-gateway", version, about = "Resilient gateway for third-party API calls")]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config: GatewayConfig = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::default_config()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mcp-gateway starting");
    tracing::info!(
        breakers = config.breakers.len(),
        quotas = config.rate_limits.len(),
        credentials_dir = %config.auth.credentials_dir.display(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Arc::new(Gateway::from_config(config.clone())?);
    let shutdown = gateway.shutdown().clone();

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AppState::new(gateway.clone());
        let timeout = Duration::from_secs(config.admin.request_timeout_secs);
        let rx = shutdown.subscribe();
        Some(tokio::spawn(admin::serve_admin(listener, state, timeout, rx)))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    shutdown_signal().await;
    shutdown.trigger();

    let drain_timeout = Duration::from_secs(config.lifecycle.drain_timeout_secs);
    if shutdown.drain(drain_timeout).await {
        tracing::info!("In-flight calls drained");
    } else {
        tracing::warn!(
            in_flight = shutdown.in_flight(),
            timeout_secs = drain_timeout.as_secs(),
            "Drain timed out with calls still in flight"
        );
    }

    if let Some(task) = admin_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
