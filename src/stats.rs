// =============================================================================
// Triage Stats — counters and rolling latency percentiles per stage
// =============================================================================
//
// Everything the observability surface reports lives here: per-stage
// processing counts, pass/reject breakdown by reason, express-lane usage,
// budget overruns, and rolling latency percentiles computed over a bounded
// sample ring per stage.
//
// Counters are lock-free atomics; latency rings take a short Mutex only on
// record and snapshot.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::candidate::PreEvaluationResult;
use crate::types::{DedupVerdict, QualityVerdict};

/// Latency samples retained per stage.
const LATENCY_RING_CAPACITY: usize = 512;

// ---------------------------------------------------------------------------
// Latency ring
// ---------------------------------------------------------------------------

/// Bounded ring of microsecond latency samples.
pub struct LatencyRing {
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyRing {
    fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(LATENCY_RING_CAPACITY)),
        }
    }

    pub fn record(&self, micros: u64) {
        let mut samples = self.samples.lock();
        samples.push_back(micros);
        while samples.len() > LATENCY_RING_CAPACITY {
            samples.pop_front();
        }
    }

    /// Nearest-rank percentile over the current ring, `None` when empty.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, sorted.len()) - 1;
        Some(sorted[idx])
    }

    fn summary(&self) -> Option<LatencySummary> {
        Some(LatencySummary {
            p50_us: self.percentile(50.0)?,
            p90_us: self.percentile(90.0)?,
            p99_us: self.percentile(99.0)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

pub struct TriageStats {
    // Ingestion
    pub ingested: AtomicU64,
    pub dropped_malformed: AtomicU64,

    // Pipeline outcomes
    pub processed: AtomicU64,
    pub express_lane: AtomicU64,
    pub passed_to_epl: AtomicU64,
    pub rejected_strength: AtomicU64,
    pub rejected_liquidity: AtomicU64,
    pub rejected_risk: AtomicU64,
    pub rejected_dedup_ignore: AtomicU64,
    pub dedup_delayed: AtomicU64,

    // Budget accounting
    pub budget_overruns: AtomicU64,

    // Feedback loop
    pub feedback_consumed: AtomicU64,

    // Per-stage latency rings
    pub regime_latency: LatencyRing,
    pub fusion_latency: LatencyRing,
    pub gate_latency: LatencyRing,
    pub total_latency: LatencyRing,
}

impl TriageStats {
    pub fn new() -> Self {
        Self {
            ingested: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            express_lane: AtomicU64::new(0),
            passed_to_epl: AtomicU64::new(0),
            rejected_strength: AtomicU64::new(0),
            rejected_liquidity: AtomicU64::new(0),
            rejected_risk: AtomicU64::new(0),
            rejected_dedup_ignore: AtomicU64::new(0),
            dedup_delayed: AtomicU64::new(0),
            budget_overruns: AtomicU64::new(0),
            feedback_consumed: AtomicU64::new(0),
            regime_latency: LatencyRing::new(),
            fusion_latency: LatencyRing::new(),
            gate_latency: LatencyRing::new(),
            total_latency: LatencyRing::new(),
        }
    }

    /// Record the terminal disposition of one candidate.
    pub fn record_result(&self, result: &PreEvaluationResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);

        if result.quality_result == QualityVerdict::Excellent {
            self.express_lane.fetch_add(1, Ordering::Relaxed);
        }
        if result.pass_to_epl {
            self.passed_to_epl.fetch_add(1, Ordering::Relaxed);
        }

        match result.dedup_result {
            DedupVerdict::Ignore => {
                self.rejected_dedup_ignore.fetch_add(1, Ordering::Relaxed);
            }
            DedupVerdict::DelayObserve => {
                self.dedup_delayed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        match result.quality_result {
            QualityVerdict::FailStrength => {
                self.rejected_strength.fetch_add(1, Ordering::Relaxed);
            }
            QualityVerdict::FailLiquidity => {
                self.rejected_liquidity.fetch_add(1, Ordering::Relaxed);
            }
            QualityVerdict::FailRisk => {
                self.rejected_risk.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        self.total_latency.record(result.processing_time_us);
    }

    /// Build a serialisable snapshot for the stats endpoint.
    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let express = self.express_lane.load(Ordering::Relaxed);
        let passed = self.passed_to_epl.load(Ordering::Relaxed);

        StatsSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            processed,
            express_lane: express,
            express_rate: rate(express, processed),
            passed_to_epl: passed,
            pass_rate: rate(passed, processed),
            rejected_strength: self.rejected_strength.load(Ordering::Relaxed),
            rejected_liquidity: self.rejected_liquidity.load(Ordering::Relaxed),
            rejected_risk: self.rejected_risk.load(Ordering::Relaxed),
            rejected_dedup_ignore: self.rejected_dedup_ignore.load(Ordering::Relaxed),
            dedup_delayed: self.dedup_delayed.load(Ordering::Relaxed),
            budget_overruns: self.budget_overruns.load(Ordering::Relaxed),
            feedback_consumed: self.feedback_consumed.load(Ordering::Relaxed),
            regime_latency: self.regime_latency.summary(),
            fusion_latency: self.fusion_latency.summary(),
            gate_latency: self.gate_latency.summary(),
            total_latency: self.total_latency.summary(),
        }
    }
}

impl Default for TriageStats {
    fn default() -> Self {
        Self::new()
    }
}

fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Serialisable stats payload for the observability API.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub ingested: u64,
    pub dropped_malformed: u64,
    pub processed: u64,
    pub express_lane: u64,
    pub express_rate: f64,
    pub passed_to_epl: u64,
    pub pass_rate: f64,
    pub rejected_strength: u64,
    pub rejected_liquidity: u64,
    pub rejected_risk: u64,
    pub rejected_dedup_ignore: u64,
    pub dedup_delayed: u64,
    pub budget_overruns: u64,
    pub feedback_consumed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime_latency: Option<LatencySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_latency: Option<LatencySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_latency: Option<LatencySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_latency: Option<LatencySummary>,
}
