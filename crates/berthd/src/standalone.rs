//! Standalone mode: embedded store, in-process queue, one HTTP listener.
//!
//! Startup order matters. The completion listener subscribes before the
//! reconciliation sweep re-arms timers, so no completion published during
//! startup is lost.

use std::net::SocketAddr;

use tokio::sync::watch;
use tracing::{error, info};

use berth_core::BerthConfig;
use berth_scheduler::Engine;
use berth_state::StateStore;

use crate::seed;

pub async fn run_standalone(config: BerthConfig) -> anyhow::Result<()> {
    info!("berth daemon starting in standalone mode");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("berth.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    seed::apply(&store, &config.seed)?;

    let engine = Engine::from_config(store, &config);
    info!(
        exhaustive_threshold = config.scheduler.exhaustive_threshold,
        min_run_secs = config.completion.min_run_secs,
        max_run_secs = config.completion.max_run_secs,
        "engine initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let listener_handle = engine.spawn_completion_listener(shutdown_rx);

    let report = engine.reconcile().await?;
    info!(
        expired = report.expired.len(),
        rearmed = report.rearmed.len(),
        requeued = report.requeued.len(),
        "startup reconciliation done"
    );

    // ── Start API server ───────────────────────────────────────

    let router = berth_api::build_router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c, shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = listener_handle.await;

    info!("berth daemon stopped");
    Ok(())
}
