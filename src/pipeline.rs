// =============================================================================
// Pipeline Orchestrator — sequences triage stages under latency budgets
// =============================================================================
//
// Per candidate:
//
//   1. Regime read (non-blocking snapshot) + weight snapshot + scoring
//   2. Express-lane pre-check (fast path: skips everything below)
//   3. Dedup ∥ Correlation, concurrently
//   4. Quality gate
//   5. Result assembly + history insert for accepted candidates
//
// Each stage has a named soft budget; an overrun is logged, counted, and
// noted on the result — never aborts the candidate.  A candidate that blows
// the total budget is still completed best-effort, since a false-negative
// rejection is costlier than a late result.
//
// Batches are ranked by comprehensive score (then recency) and capped to
// bound downstream load.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::candidate::{
    PreEvaluationResult, RiskAssessment, SevenDimensionalScore, SignalCandidate,
};
use crate::correlation::{CorrelationAnalysis, CorrelationResolver};
use crate::dedup::{DedupAnalysis, DedupEngine};
use crate::express::ExpressLane;
use crate::quality::QualityGate;
use crate::regime::MarketRegimeTracker;
use crate::runtime_config::TriageConfig;
use crate::scoring::SevenDimensionalScorer;
use crate::stats::TriageStats;
use crate::types::{CorrelationVerdict, DedupVerdict, QualityVerdict};
use crate::weights::AdaptiveWeightEngine;

pub struct TriagePipeline {
    config: TriageConfig,
    scorer: SevenDimensionalScorer,
    quality: QualityGate,
    regime: Arc<MarketRegimeTracker>,
    weights: Arc<AdaptiveWeightEngine>,
    dedup: Arc<DedupEngine>,
    correlation: Arc<CorrelationResolver>,
    stats: Arc<TriageStats>,
}

impl TriagePipeline {
    pub fn new(
        config: TriageConfig,
        regime: Arc<MarketRegimeTracker>,
        weights: Arc<AdaptiveWeightEngine>,
        dedup: Arc<DedupEngine>,
        correlation: Arc<CorrelationResolver>,
        stats: Arc<TriageStats>,
    ) -> Self {
        let scorer = SevenDimensionalScorer::new(
            config.dimension_weights.clone(),
            config.recency_half_life_secs,
        );
        let quality = QualityGate::new(config.quality.clone(), config.fail_open);
        Self {
            config,
            scorer,
            quality,
            regime,
            weights,
            dedup,
            correlation,
            stats,
        }
    }

    /// Run one candidate through the full triage pipeline.
    pub async fn process(&self, candidate: SignalCandidate) -> PreEvaluationResult {
        let started = Instant::now();
        let mut notes = Vec::new();

        // ── 1. Regime sync + scoring ─────────────────────────────────────
        let stage = Instant::now();
        let regime = self.regime.snapshot();
        let weight_snapshot = self.weights.snapshot();

        notes.push(format!(
            "regime: {} (vol pct {:.2}, extreme={}, age {}ms)",
            regime.regime_type,
            regime.volatility_percentile,
            regime.is_extreme_market,
            regime.age_ms()
        ));

        let (score, score_notes) =
            self.scorer
                .score(&candidate, &regime, &weight_snapshot, Utc::now());
        notes.extend(score_notes);

        let regime_elapsed = stage.elapsed();
        self.stats
            .regime_latency
            .record(regime_elapsed.as_micros() as u64);
        self.note_overrun(
            "regime_sync",
            regime_elapsed.as_millis() as u64,
            self.config.budgets.regime_sync_ms,
            &mut notes,
        );

        // ── 2. Express lane ──────────────────────────────────────────────
        match ExpressLane::disqualify_reason(
            &candidate,
            candidate.market_environment.volatility,
            &self.config.express,
        ) {
            None => {
                notes.push(
                    "express lane: qualified; dedup/correlation/quality bypassed".to_string(),
                );
                self.dedup.record_accepted(candidate.summary());
                return self.finish(
                    candidate,
                    score,
                    DedupVerdict::Unique,
                    CorrelationVerdict::IndependentNew,
                    QualityVerdict::Excellent,
                    RiskAssessment::synthetic_low(),
                    0.0,
                    true,
                    notes,
                    started,
                );
            }
            Some(reason) => {
                notes.push(format!("express lane: not eligible ({reason})"));
            }
        }

        // ── 3. Dedup ∥ Correlation ───────────────────────────────────────
        let stage = Instant::now();
        let dedup_engine = self.dedup.clone();
        let resolver = self.correlation.clone();
        let for_dedup = candidate.clone();
        let for_correlation = candidate.clone();

        let (dedup_joined, correlation_joined) = tokio::join!(
            tokio::task::spawn_blocking(move || dedup_engine.analyze(&for_dedup)),
            tokio::task::spawn_blocking(move || resolver.analyze(&for_correlation)),
        );

        let dedup_analysis = dedup_joined.unwrap_or_else(|e| {
            warn!(error = %e, "dedup task failed");
            let verdict = if self.config.fail_open {
                DedupVerdict::Pass
            } else {
                DedupVerdict::Ignore
            };
            DedupAnalysis {
                verdict,
                similarity: 0.0,
                notes: vec![format!("dedup task failed ({e}); defaulting to {verdict}")],
            }
        });
        let correlation_analysis = correlation_joined.unwrap_or_else(|e| {
            warn!(error = %e, "correlation task failed");
            CorrelationAnalysis {
                verdict: CorrelationVerdict::IndependentNew,
                notes: vec![format!(
                    "correlation task failed ({e}); defaulting to INDEPENDENT_NEW"
                )],
            }
        });

        notes.extend(dedup_analysis.notes.clone());
        notes.extend(correlation_analysis.notes.clone());

        let fusion_elapsed = stage.elapsed();
        self.stats
            .fusion_latency
            .record(fusion_elapsed.as_micros() as u64);
        self.note_overrun(
            "fusion",
            fusion_elapsed.as_millis() as u64,
            self.config.budgets.fusion_ms,
            &mut notes,
        );

        // ── 4. Quality gate ──────────────────────────────────────────────
        let stage = Instant::now();
        let evaluation = self.quality.evaluate(&candidate);
        notes.extend(evaluation.notes.clone());

        let gate_elapsed = stage.elapsed();
        self.stats
            .gate_latency
            .record(gate_elapsed.as_micros() as u64);
        self.note_overrun(
            "gate",
            gate_elapsed.as_millis() as u64,
            self.config.budgets.gate_ms,
            &mut notes,
        );

        // ── 5. Assembly ──────────────────────────────────────────────────
        let pass_to_epl =
            dedup_analysis.verdict.is_pass() && evaluation.verdict.is_pass();
        if pass_to_epl {
            self.dedup.record_accepted(candidate.summary());
        }

        self.finish(
            candidate,
            score,
            dedup_analysis.verdict,
            correlation_analysis.verdict,
            evaluation.verdict,
            evaluation.risk,
            dedup_analysis.similarity,
            pass_to_epl,
            notes,
            started,
        )
    }

    /// Process a batch of candidates concurrently, then rank and cap the
    /// emitted results by comprehensive score (ties broken by recency).
    pub async fn process_batch(
        self: &Arc<Self>,
        candidates: Vec<SignalCandidate>,
    ) -> Vec<PreEvaluationResult> {
        let mut handles = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let pipeline = self.clone();
            handles.push(tokio::spawn(
                async move { pipeline.process(candidate).await },
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "candidate task failed; result lost"),
            }
        }

        rank_and_cap(results, self.config.batch_cap)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        candidate: SignalCandidate,
        score: SevenDimensionalScore,
        dedup_result: DedupVerdict,
        correlation_result: CorrelationVerdict,
        quality_result: QualityVerdict,
        risk_assessment: RiskAssessment,
        similarity_score: f64,
        pass_to_epl: bool,
        mut notes: Vec<String>,
        started: Instant,
    ) -> PreEvaluationResult {
        let total_elapsed = started.elapsed();
        let total_ms = total_elapsed.as_millis() as u64;
        if total_ms > self.config.budgets.total_ms {
            self.stats
                .budget_overruns
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(
                symbol = %candidate.symbol,
                total_ms,
                budget_ms = self.config.budgets.total_ms,
                "total latency budget exceeded"
            );
            notes.push(format!(
                "budget: total {}ms exceeded {}ms soft budget",
                total_ms, self.config.budgets.total_ms
            ));
        }

        debug!(
            symbol = %candidate.symbol,
            dedup = %dedup_result,
            correlation = %correlation_result,
            quality = %quality_result,
            pass_to_epl,
            score = format!("{:.3}", score.comprehensive_score),
            elapsed_us = total_elapsed.as_micros() as u64,
            "candidate triaged"
        );

        let result = PreEvaluationResult {
            candidate,
            score,
            dedup_result,
            correlation_result,
            quality_result,
            pass_to_epl,
            risk_assessment,
            processing_notes: notes,
            similarity_score,
            processing_time_us: total_elapsed.as_micros() as u64,
            timestamp: Utc::now().to_rfc3339(),
        };

        self.stats.record_result(&result);
        result
    }

    fn note_overrun(
        &self,
        stage: &str,
        elapsed_ms: u64,
        budget_ms: u64,
        notes: &mut Vec<String>,
    ) {
        if elapsed_ms > budget_ms {
            self.stats
                .budget_overruns
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(stage, elapsed_ms, budget_ms, "stage budget exceeded");
            notes.push(format!(
                "budget: {stage} {elapsed_ms}ms exceeded {budget_ms}ms soft budget"
            ));
        }
    }
}

/// Rank results by comprehensive score descending, ties broken by the more
/// recent candidate, and cap the batch.
fn rank_and_cap(
    mut results: Vec<PreEvaluationResult>,
    cap: usize,
) -> Vec<PreEvaluationResult> {
    results.sort_by(|a, b| {
        b.score
            .comprehensive_score
            .partial_cmp(&a.score.comprehensive_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.candidate.timestamp.cmp(&a.candidate.timestamp))
    });
    results.truncate(cap);
    results
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{MarketEnvironment, TechnicalSnapshot};
    use crate::types::{Direction, SignalSource};
    use chrono::Duration;

    fn pipeline() -> Arc<TriagePipeline> {
        pipeline_with_config(TriageConfig::default())
    }

    fn pipeline_with_config(config: TriageConfig) -> Arc<TriagePipeline> {
        let regime = Arc::new(MarketRegimeTracker::new(config.regime.clone()));
        let weights = Arc::new(AdaptiveWeightEngine::new(config.weight_engine.clone()));
        let dedup = Arc::new(DedupEngine::new(config.dedup.clone(), config.fail_open));
        let correlation = Arc::new(CorrelationResolver::new(config.correlation.clone()));
        let stats = Arc::new(TriageStats::new());
        Arc::new(TriagePipeline::new(
            config,
            regime,
            weights,
            dedup,
            correlation,
            stats,
        ))
    }

    /// Solid-but-ordinary candidate: passes the gate, misses the express
    /// profile (completeness below 0.9).
    fn ordinary_candidate(symbol: &str) -> SignalCandidate {
        SignalCandidate {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction: Direction::Long,
            signal_strength: 72.0,
            confidence: 0.7,
            source: SignalSource::Standardizer,
            timestamp: Utc::now(),
            technical_snapshot: TechnicalSnapshot {
                rsi: Some(55.0),
                macd_signal: Some(0.3),
                bollinger_position: Some(0.5),
                atr: Some(120.0),
                stochastic: Some(42.0),
                williams_r: Some(-50.0),
            },
            market_environment: MarketEnvironment {
                volatility: 0.01,
                liquidity_score: 0.65,
                momentum: 0.2,
                funding_rate: 0.0001,
                orderbook_imbalance: 0.1,
            },
            data_completeness: 0.7,
            signal_clarity: 0.6,
        }
    }

    fn premium_candidate(symbol: &str) -> SignalCandidate {
        let mut c = ordinary_candidate(symbol);
        c.signal_strength = 82.0;
        c.confidence = 0.85;
        c.market_environment.volatility = 0.008;
        c.data_completeness = 0.95;
        c.signal_clarity = 0.9;
        c
    }

    #[tokio::test]
    async fn healthy_candidate_passes_end_to_end() {
        let p = pipeline();
        let result = p.process(ordinary_candidate("BTCUSDT")).await;

        assert_eq!(result.quality_result, QualityVerdict::Pass);
        assert_eq!(result.dedup_result, DedupVerdict::Unique);
        assert_eq!(result.correlation_result, CorrelationVerdict::IndependentNew);
        assert!(result.pass_to_epl);
        assert!(!result.processing_notes.is_empty());
    }

    #[tokio::test]
    async fn weak_candidate_fails_strength() {
        let p = pipeline();
        let mut c = ordinary_candidate("BTCUSDT");
        c.signal_strength = 50.0;

        let result = p.process(c).await;
        assert_eq!(result.quality_result, QualityVerdict::FailStrength);
        assert!(!result.pass_to_epl);
    }

    #[tokio::test]
    async fn near_duplicate_is_ignored() {
        let p = pipeline();
        let first = ordinary_candidate("BTCUSDT");
        let mut second = first.clone();
        second.id = uuid::Uuid::new_v4().to_string();
        second.timestamp = first.timestamp + Duration::seconds(120);
        second.confidence = 0.71;

        let first_result = p.process(first).await;
        assert!(first_result.pass_to_epl);

        let second_result = p.process(second).await;
        assert_eq!(second_result.dedup_result, DedupVerdict::Ignore);
        assert!(second_result.similarity_score > 0.95);
        assert!(!second_result.pass_to_epl);
    }

    #[tokio::test]
    async fn opposite_position_with_jump_replaces() {
        let p = pipeline();

        let mut held = ordinary_candidate("BTCUSDT");
        held.confidence = 0.5;
        p.correlation.update_position(&held.summary());

        let mut challenger = ordinary_candidate("BTCUSDT");
        challenger.direction = Direction::Short;
        challenger.confidence = 0.7; // jump of 0.2

        let result = p.process(challenger).await;
        assert_eq!(
            result.correlation_result,
            CorrelationVerdict::ReplaceCandidate
        );
    }

    #[tokio::test]
    async fn express_lane_bypasses_and_records_history() {
        let p = pipeline();
        let result = p.process(premium_candidate("BTCUSDT")).await;

        assert_eq!(result.quality_result, QualityVerdict::Excellent);
        assert_eq!(result.dedup_result, DedupVerdict::Unique);
        assert!(result.pass_to_epl);
        assert!(result
            .processing_notes
            .iter()
            .any(|n| n.contains("express lane: qualified")));
        // No dedup/correlation notes on the fast path.
        assert!(!result
            .processing_notes
            .iter()
            .any(|n| n.starts_with("dedup:") || n.starts_with("correlation:")));

        // Fast-path acceptance still lands in dedup history: a near-identical
        // follower (below the express bar) is caught.
        let mut follower = premium_candidate("BTCUSDT");
        follower.id = uuid::Uuid::new_v4().to_string();
        follower.data_completeness = 0.7;
        follower.timestamp = result.candidate.timestamp + Duration::seconds(60);
        let follower_result = p.process(follower).await;
        assert_eq!(follower_result.dedup_result, DedupVerdict::Ignore);
    }

    #[tokio::test]
    async fn batch_is_ranked_and_capped() {
        let mut config = TriageConfig::default();
        config.batch_cap = 2;
        let p = pipeline_with_config(config);

        let strong = premium_candidate("BTCUSDT");
        let mut medium = ordinary_candidate("ETHUSDT");
        medium.signal_strength = 74.0;
        let mut weak = ordinary_candidate("SOLUSDT");
        weak.signal_strength = 50.0;
        weak.confidence = 0.4;

        let batch = p.process_batch(vec![weak, strong, medium]).await;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].candidate.symbol, "BTCUSDT");
        assert!(
            batch[0].score.comprehensive_score >= batch[1].score.comprehensive_score
        );
    }

    #[tokio::test]
    async fn stats_reflect_dispositions() {
        let p = pipeline();

        p.process(ordinary_candidate("BTCUSDT")).await;
        p.process(premium_candidate("ETHUSDT")).await;
        let mut weak = ordinary_candidate("SOLUSDT");
        weak.signal_strength = 40.0;
        p.process(weak).await;

        let snap = p.stats.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.express_lane, 1);
        assert_eq!(snap.passed_to_epl, 2);
        assert_eq!(snap.rejected_strength, 1);
        assert!(snap.total_latency.is_some());
    }
}
