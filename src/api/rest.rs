// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Read endpoints expose the
// observability surface (stats, weights, regime, recent results). Write
// endpoints are the engine's external interfaces:
//
//   POST   /api/v1/signals          — upstream candidate ingestion
//   POST   /api/v1/tick             — market data for the regime tracker
//   POST   /api/v1/feedback         — decision outcomes from the EPL
//   POST   /api/v1/position         — position sync from the execution layer
//   DELETE /api/v1/position/:symbol — position close notification
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::candidate::CandidateSummary;
use crate::collector::{MultiSourceCollector, RawSignal};
use crate::regime::MarketTick;
use crate::types::{Direction, SignalSource};
use crate::weights::DecisionOutcome;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Observability ───────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/weights", get(weights))
        .route("/api/v1/regime", get(regime))
        .route("/api/v1/results", get(results))
        // ── External interfaces ─────────────────────────────────────
        .route("/api/v1/signals", post(ingest_signals))
        .route("/api/v1/tick", post(market_tick))
        .route("/api/v1/feedback", post(feedback))
        .route("/api/v1/position", post(position_sync))
        .route("/api/v1/position/:symbol", delete(position_close))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Observability endpoints
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

async fn weights(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json((*state.weight_engine.snapshot()).clone())
}

async fn regime(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.regime_tracker.snapshot();
    Json(serde_json::json!({
        "regime": (*snapshot).clone(),
        "age_ms": snapshot.age_ms(),
    }))
}

async fn results(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.recent_results.read().clone())
}

// =============================================================================
// Signal ingestion
// =============================================================================

#[derive(Serialize)]
struct IngestResponse {
    accepted: usize,
    dropped: usize,
    batch: Vec<crate::candidate::PreEvaluationResult>,
}

/// Ingest a batch of raw upstream signals: normalise, triage concurrently,
/// and return the ranked, capped result batch.
async fn ingest_signals(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<Vec<RawSignal>>,
) -> impl IntoResponse {
    let total = raw.len();
    let (candidates, dropped) = MultiSourceCollector::normalize_batch(raw);

    state
        .stats
        .ingested
        .fetch_add(total as u64, Ordering::Relaxed);
    state
        .stats
        .dropped_malformed
        .fetch_add(dropped as u64, Ordering::Relaxed);

    let accepted = candidates.len();
    let batch = state.pipeline.process_batch(candidates).await;
    state.push_results(&batch);

    debug!(total, accepted, dropped, emitted = batch.len(), "signal batch triaged");

    Json(IngestResponse {
        accepted,
        dropped,
        batch,
    })
}

// =============================================================================
// Market data
// =============================================================================

async fn market_tick(
    State(state): State<Arc<AppState>>,
    Json(tick): Json<MarketTick>,
) -> impl IntoResponse {
    state.regime_tracker.record_tick(tick);
    StatusCode::ACCEPTED
}

// =============================================================================
// Decision feedback
// =============================================================================

/// Enqueue a decision outcome for the single-writer learning task.
async fn feedback(
    State(state): State<Arc<AppState>>,
    Json(outcome): Json<DecisionOutcome>,
) -> impl IntoResponse {
    match state.feedback_tx.send(outcome).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            state.push_error(format!("feedback channel closed: {e}"));
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

// =============================================================================
// Position sync
// =============================================================================

#[derive(Debug, Deserialize)]
struct PositionSyncRequest {
    symbol: String,
    direction: Direction,
    confidence: f64,
    #[serde(default)]
    signal_strength: f64,
    source: SignalSource,
}

async fn position_sync(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PositionSyncRequest>,
) -> impl IntoResponse {
    let summary = CandidateSummary {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: req.symbol.trim().to_uppercase(),
        direction: req.direction,
        signal_strength: req.signal_strength,
        confidence: req.confidence,
        source: req.source,
        timestamp: chrono::Utc::now(),
        technical_snapshot: Default::default(),
    };
    state.correlation_resolver.update_position(&summary);
    state.increment_version();
    StatusCode::ACCEPTED
}

async fn position_close(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.trim().to_uppercase();
    if state.correlation_resolver.remove_position(&symbol) {
        state.increment_version();
        info!(%symbol, "position closed via API");
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}
