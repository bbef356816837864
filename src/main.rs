//! Pong Server - authoritative wagered pong game server
//!
//! This is the main entry point for the game server. It handles:
//! - WebSocket connections for lobby actions and real-time play
//! - HTTP endpoints for health and room listings
//! - Settlement of reserved wagers when matches end

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pong_server::app::{spawn_settlement, AppState};
use pong_server::config::Config;
use pong_server::http::build_router;
use pong_server::matchmaking::InMemoryLedger;
use pong_server::util::time::init_server_time;
use pong_server::util::Lifetime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Pong Server");
    info!("Server address: {}", config.server_addr);
    info!(
        tick_rate = config.game.tick_rate,
        max_score = config.game.max_score,
        free_play = config.game.free_play,
        "Game settings loaded"
    );

    // Create application state
    let ledger = Arc::new(InMemoryLedger::new());
    let state = AppState::new(config.clone(), ledger.clone());

    // Release reservations as matches finish
    let settlement_stop = Lifetime::new();
    let settlement = spawn_settlement(&state.hub, ledger, settlement_stop.clone());

    let manager = state.manager.clone();

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stopped matches publish their results here; settle them before exiting
    let stopped = manager.shutdown();
    settlement_stop.cancel();
    if let Err(e) = settlement.await {
        error!(error = %e, "Settlement task failed");
    }
    info!(stopped_games = stopped, "Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
