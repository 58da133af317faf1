// =============================================================================
// Gatekeeper — Deterministic Trading-Signal Admission Controller
// =============================================================================
//
// Composition root: load the frozen configuration, wire the subsystems,
// start the background sweepers and the config integrity watcher, then
// serve the HTTP boundary until shutdown.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod confidence;
mod config;
mod context;
mod engine;
mod gates;
mod normalizer;
mod performance;
mod providers;
mod stores;
mod types;
mod validity;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{EngineConfig, ENGINE_VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Gatekeeper Admission Engine — Starting Up         ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!(version = ENGINE_VERSION, "engine version");

    // ── 2. Frozen configuration (fail fast on missing/invalid keys) ──────
    let config = EngineConfig::from_env()?;

    // ── 3. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(Arc::clone(&config)));

    // ── 4. Background loops ──────────────────────────────────────────────
    let sweepers = state.start_sweepers();
    info!(
        interval_secs = config.stores.sweep_interval_secs,
        "store sweepers started"
    );

    let guard_task = Arc::clone(&state.config_guard).start(Duration::from_secs(30));
    info!("config integrity watcher started");

    // ── 5. Serve the HTTP boundary ───────────────────────────────────────
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let app = api::rest::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    for sweeper in sweepers {
        sweeper.stop();
    }
    guard_task.abort();
    server.abort();

    info!("Gatekeeper shut down complete.");
    Ok(())
}
