// =============================================================================
// Aurora Signal Triage — Main Entry Point
// =============================================================================
//
// Wires the triage core together: config, shared state, the single-writer
// feedback consumer, the regime refresh loop, and the REST surface that
// carries both observability reads and the external write interfaces.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod candidate;
mod collector;
mod correlation;
mod dedup;
mod express;
mod pipeline;
mod quality;
mod regime;
mod runtime_config;
mod scoring;
mod stats;
mod types;
mod weights;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::TriageConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Signal Triage — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = TriageConfig::load("triage_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        TriageConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("AURORA_TRIAGE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    // Defaults are valid; a hand-edited file may not be.
    config.validate()?;

    info!(
        symbols = ?config.symbols,
        batch_cap = config.batch_cap,
        fail_open = config.fail_open,
        total_budget_ms = config.budgets.total_ms,
        "Triage engine configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let (feedback_tx, mut feedback_rx) = tokio::sync::mpsc::channel(1024);
    let state = Arc::new(AppState::new(config, feedback_tx));

    // ── 3. Feedback consumer (single writer for the weight engine) ───────
    let learn_state = state.clone();
    let learning_budget_ms = learn_state.config.read().budgets.learning_ms;
    tokio::spawn(async move {
        while let Some(outcome) = feedback_rx.recv().await {
            let started = std::time::Instant::now();
            learn_state.weight_engine.learn_from_feedback(outcome);

            let elapsed_ms = started.elapsed().as_millis() as u64;
            if elapsed_ms > learning_budget_ms {
                learn_state
                    .stats
                    .budget_overruns
                    .fetch_add(1, Ordering::Relaxed);
                warn!(elapsed_ms, budget_ms = learning_budget_ms, "learning budget exceeded");
            }

            learn_state
                .stats
                .feedback_consumed
                .fetch_add(1, Ordering::Relaxed);
            learn_state.increment_version();
        }
        warn!("feedback channel closed — learning loop stopped");
    });

    // ── 4. Regime refresh loop ───────────────────────────────────────────
    // Recomputes classification on a fixed cadence, independent of
    // per-candidate processing, and propagates the extreme-market flag into
    // the weight engine's emergency mode.
    let regime_state = state.clone();
    let refresh_secs = regime_state.config.read().regime.refresh_secs.max(1);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs));
        loop {
            interval.tick().await;
            let snapshot = regime_state.regime_tracker.refresh();
            regime_state
                .weight_engine
                .set_emergency(snapshot.is_extreme_market);
            regime_state.increment_version();
        }
    });

    // ── 5. Start the API server ──────────────────────────────────────────
    let bind_addr = std::env::var("AURORA_TRIAGE_BIND_ADDR")
        .unwrap_or_else(|_| state.config.read().bind_addr.clone());
    let api_state = state.clone();
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.config.read().save("triage_config.json") {
        error!(error = %e, "Failed to save triage config on shutdown");
    }

    info!("Aurora Signal Triage shut down complete.");
    Ok(())
}
