//! Hub binary entry point.
//!
//! Wires the control plane together: event bus, node registry, session
//! map, distributor, health monitor, janitor, and the public HTTP router.
//!
//! # Environment Variables
//!
//! - `BROWSERGRID_CONFIG`: path to a TOML configuration file
//! - `BROWSERGRID_HOST` / `BROWSERGRID_PORT`: bind address overrides
//! - `BROWSERGRID_REGISTRATION_SECRET`: node registration secret
//! - `RUST_LOG`: log filter (default: `info`)

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use browsergrid_core::config::Config;
use browsergrid_core::distributor::Distributor;
use browsergrid_core::events::{EventBus, LocalEventBus};
use browsergrid_core::health::{HealthMonitor, Janitor};
use browsergrid_core::registry::NodeRegistry;
use browsergrid_core::sessionmap::SessionMap;
use browsergrid_http::{build_router, AppState, HttpNodeClientFactory};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        heartbeat_interval_secs = config.grid.heartbeat_interval_secs,
        "starting hub"
    );

    let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());
    let registry = Arc::new(NodeRegistry::new(
        bus.clone(),
        config.grid.registration_secret.clone(),
    ));
    let sessions = Arc::new(SessionMap::new(bus.clone()));
    let clients = Arc::new(HttpNodeClientFactory::new(
        config.grid.node_rpc_timeout(),
        config.grid.health_probe_timeout(),
    ));
    let distributor = Arc::new(Distributor::new(
        registry.clone(),
        sessions.clone(),
        bus.clone(),
        clients.clone(),
        config.grid.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let heartbeat_task = registry.spawn_heartbeat_listener(shutdown_tx.subscribe());
    let cascade_task = sessions.spawn_node_removed_listener(shutdown_tx.subscribe());
    let health_task = Arc::new(HealthMonitor::new(
        registry.clone(),
        clients,
        config.grid.clone(),
    ))
    .spawn(shutdown_tx.subscribe());
    let janitor_task =
        Janitor::new(registry.clone(), config.grid.clone()).spawn(shutdown_tx.subscribe());

    let state = AppState::new(
        distributor,
        sessions,
        registry,
        bus,
        config.grid.node_rpc_timeout(),
    );
    let router = build_router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("hub listening on {bind_addr}");

    let shutdown_for_serve = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, draining");
            let _ = shutdown_for_serve.send(());
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = heartbeat_task.await;
    let _ = cascade_task.await;
    let _ = health_task.await;
    let _ = janitor_task.await;

    tracing::info!("hub shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => tracing::error!("failed to install SIGTERM handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
