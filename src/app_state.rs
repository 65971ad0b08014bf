// =============================================================================
// Central Application State — Aurora Triage Engine
// =============================================================================
//
// The single source of truth for the engine. All subsystems hold Arc
// references to their own state; AppState ties them together and provides a
// unified snapshot for the observability API.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::candidate::PreEvaluationResult;
use crate::correlation::{CorrelationPositionEntry, CorrelationResolver};
use crate::dedup::DedupEngine;
use crate::pipeline::TriagePipeline;
use crate::regime::{MarketRegimeState, MarketRegimeTracker};
use crate::runtime_config::TriageConfig;
use crate::stats::{StatsSnapshot, TriageStats};
use crate::weights::{AdaptiveWeightEngine, DecisionOutcome, SourceWeightSnapshot};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the observability error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent results to retain.
const MAX_RECENT_RESULTS: usize = 100;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<TriageConfig>>,

    // ── Core engines ────────────────────────────────────────────────────
    pub regime_tracker: Arc<MarketRegimeTracker>,
    pub weight_engine: Arc<AdaptiveWeightEngine>,
    pub dedup_engine: Arc<DedupEngine>,
    pub correlation_resolver: Arc<CorrelationResolver>,
    pub pipeline: Arc<TriagePipeline>,
    pub stats: Arc<TriageStats>,

    // ── Feedback ingress (consumed by the single-writer learning task) ──
    pub feedback_tx: mpsc::Sender<DecisionOutcome>,

    // ── Audit rings ─────────────────────────────────────────────────────
    pub recent_results: RwLock<Vec<PreEvaluationResult>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the full engine from a validated configuration. The
    /// feedback sender is wired into the state; the caller owns the matching
    /// receiver and runs the consumer task.
    pub fn new(config: TriageConfig, feedback_tx: mpsc::Sender<DecisionOutcome>) -> Self {
        let regime_tracker = Arc::new(MarketRegimeTracker::new(config.regime.clone()));
        let weight_engine = Arc::new(AdaptiveWeightEngine::new(config.weight_engine.clone()));
        let dedup_engine = Arc::new(DedupEngine::new(config.dedup.clone(), config.fail_open));
        let correlation_resolver =
            Arc::new(CorrelationResolver::new(config.correlation.clone()));
        let stats = Arc::new(TriageStats::new());

        let pipeline = Arc::new(TriagePipeline::new(
            config.clone(),
            regime_tracker.clone(),
            weight_engine.clone(),
            dedup_engine.clone(),
            correlation_resolver.clone(),
            stats.clone(),
        ));

        Self {
            state_version: AtomicU64::new(1),
            config: Arc::new(RwLock::new(config)),
            regime_tracker,
            weight_engine,
            dedup_engine,
            correlation_resolver,
            pipeline,
            stats,
            feedback_tx,
            recent_results: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Audit rings ─────────────────────────────────────────────────────

    /// Record a batch of triage results in the audit ring, capped at
    /// [`MAX_RECENT_RESULTS`]; oldest entries are evicted.
    pub fn push_results(&self, batch: &[PreEvaluationResult]) {
        let mut results = self.recent_results.write();
        results.extend_from_slice(batch);
        let len = results.len();
        if len > MAX_RECENT_RESULTS {
            results.drain(0..len - MAX_RECENT_RESULTS);
        }
        drop(results);
        self.increment_version();
    }

    /// Record an error message, capped at [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, msg: String) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the engine state for the
    /// REST `GET /api/v1/state` endpoint.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let regime = self.regime_tracker.snapshot();
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            stats: self.stats.snapshot(),
            regime_age_ms: regime.age_ms(),
            regime: (*regime).clone(),
            weights: (*self.weight_engine.snapshot()).clone(),
            tracked_positions: self.correlation_resolver.all_positions(),
            recent_results: self.recent_results.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot for the observability surface.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub stats: StatsSnapshot,
    pub regime: MarketRegimeState,
    pub regime_age_ms: i64,
    pub weights: SourceWeightSnapshot,
    pub tracked_positions: Vec<CorrelationPositionEntry>,
    pub recent_results: Vec<PreEvaluationResult>,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let (tx, _rx) = mpsc::channel(16);
        AppState::new(TriageConfig::default(), tx)
    }

    #[test]
    fn version_increments() {
        let s = state();
        let v0 = s.current_state_version();
        s.increment_version();
        assert_eq!(s.current_state_version(), v0 + 1);
    }

    #[test]
    fn error_ring_is_bounded() {
        let s = state();
        for i in 0..100 {
            s.push_error(format!("error {i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.last().unwrap().message, "error 99");
    }

    #[test]
    fn snapshot_builds_with_defaults() {
        let s = state();
        let snap = s.build_snapshot();
        assert_eq!(snap.stats.processed, 0);
        assert!(snap.tracked_positions.is_empty());
        assert!(snap.recent_results.is_empty());
        assert_eq!(snap.weights.total_feedback, 0);
    }
}
