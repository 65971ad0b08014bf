// =============================================================================
// Seven-Dimensional Scorer — weighted composite signal quality
// =============================================================================
//
// Pure function of (candidate, regime snapshot, weight snapshot, as-of time):
// re-running on unchanged inputs yields the identical score.  Never errors —
// any missing or non-finite field substitutes a conservative neutral value
// and records a processing note.
//
//   comprehensive = Σ(dimension_i × weight_i) + ai_enhancement
//
// with ai_enhancement bounded to ±0.1 and the result clamped to [0, 1].
// =============================================================================

use chrono::{DateTime, Timelike, Utc};

use crate::candidate::{SevenDimensionalScore, SignalCandidate};
use crate::regime::{MarketRegimeState, RegimeType};
use crate::runtime_config::DimensionWeights;
use crate::types::{Direction, TradingSession};
use crate::weights::SourceWeightSnapshot;

/// Neutral substitute for any dimension that cannot be computed.
const NEUTRAL: f64 = 0.5;
/// Maximum magnitude of the AI enhancement term.
const AI_ENHANCEMENT_BOUND: f64 = 0.1;

pub struct SevenDimensionalScorer {
    weights: DimensionWeights,
    recency_half_life_secs: f64,
}

impl SevenDimensionalScorer {
    pub fn new(weights: DimensionWeights, recency_half_life_secs: f64) -> Self {
        Self {
            weights,
            recency_half_life_secs: recency_half_life_secs.max(1.0),
        }
    }

    /// Score one candidate against the given regime and weight snapshots.
    ///
    /// `as_of` anchors the recency decay so that scoring is deterministic for
    /// a fixed set of inputs (the pipeline passes its processing start time).
    pub fn score(
        &self,
        candidate: &SignalCandidate,
        regime: &MarketRegimeState,
        weight_snapshot: &SourceWeightSnapshot,
        as_of: DateTime<Utc>,
    ) -> (SevenDimensionalScore, Vec<String>) {
        let mut notes = Vec::new();

        let strength = sanitize(
            candidate.signal_strength / 100.0,
            "signal_strength",
            &mut notes,
        );
        let confidence = sanitize(candidate.confidence, "confidence", &mut notes);

        // Data quality blends the generator's own completeness estimate with
        // how much of the snapshot actually arrived.
        let completeness = sanitize(candidate.data_completeness, "data_completeness", &mut notes);
        let presence = candidate.technical_snapshot.presence_ratio();
        let data_quality = 0.6 * completeness + 0.4 * presence;

        let market_consistency = market_consistency(candidate, regime, &mut notes);
        let time_effect = self.time_effect(candidate, as_of);
        let liquidity_factor = sanitize(
            candidate.market_environment.liquidity_score,
            "liquidity_score",
            &mut notes,
        );
        let historical_accuracy = weight_snapshot.source_quality(candidate.source);

        let ai_enhancement = (weight_snapshot.predict_pass_probability(candidate) - 0.5)
            * (2.0 * AI_ENHANCEMENT_BOUND);

        let w = &self.weights;
        let weighted = strength * w.strength
            + confidence * w.confidence
            + data_quality * w.data_quality
            + market_consistency * w.market_consistency
            + time_effect * w.time_effect
            + liquidity_factor * w.liquidity
            + historical_accuracy * w.historical_accuracy;

        let comprehensive_score = (weighted + ai_enhancement).clamp(0.0, 1.0);

        (
            SevenDimensionalScore {
                strength,
                confidence,
                data_quality,
                market_consistency,
                time_effect,
                liquidity_factor,
                historical_accuracy,
                ai_enhancement,
                comprehensive_score,
            },
            notes,
        )
    }

    /// Recency decay with a session-appropriateness multiplier.
    fn time_effect(&self, candidate: &SignalCandidate, as_of: DateTime<Utc>) -> f64 {
        let age_secs = (as_of - candidate.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
        let decay = 0.5_f64.powf(age_secs / self.recency_half_life_secs);

        let session = TradingSession::from_utc_hour(as_of.hour());
        let session_factor = match session {
            TradingSession::American => 1.0,
            TradingSession::European => 0.95,
            TradingSession::Asian => 0.85,
        };

        (decay * session_factor).clamp(0.0, 1.0)
    }
}

/// Agreement between the candidate's direction and the current regime trend.
fn market_consistency(
    candidate: &SignalCandidate,
    regime: &MarketRegimeState,
    notes: &mut Vec<String>,
) -> f64 {
    if regime.sample_count == 0 {
        notes.push("market_consistency: regime warming up, neutral applied".to_string());
        return NEUTRAL;
    }

    let trend_aligned = match candidate.direction {
        Direction::Long => regime.price_change_pct > 0.0,
        Direction::Short => regime.price_change_pct < 0.0,
    };
    let momentum = candidate.market_environment.momentum;
    let momentum_aligned = match candidate.direction {
        Direction::Long => momentum >= 0.0,
        Direction::Short => momentum <= 0.0,
    };

    match regime.regime_type {
        RegimeType::Trending => {
            if trend_aligned {
                0.9
            } else {
                0.25
            }
        }
        RegimeType::Ranging => 0.55,
        RegimeType::Volatile => {
            if momentum_aligned {
                0.5
            } else {
                0.35
            }
        }
    }
}

/// Clamp a dimension input to [0, 1]; non-finite values fall back to the
/// conservative neutral with a note.
fn sanitize(value: f64, field: &str, notes: &mut Vec<String>) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        notes.push(format!("{field}: non-finite value, neutral applied"));
        NEUTRAL
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{MarketEnvironment, TechnicalSnapshot};
    use crate::runtime_config::WeightEngineConfig;
    use crate::types::SignalSource;
    use crate::weights::AdaptiveWeightEngine;

    fn scorer() -> SevenDimensionalScorer {
        SevenDimensionalScorer::new(DimensionWeights::default(), 300.0)
    }

    fn weight_snapshot() -> std::sync::Arc<SourceWeightSnapshot> {
        AdaptiveWeightEngine::new(WeightEngineConfig::default()).snapshot()
    }

    fn regime_trending_up() -> MarketRegimeState {
        MarketRegimeState {
            regime_type: RegimeType::Trending,
            price_change_pct: 1.5,
            volatility: 0.01,
            volatility_percentile: 0.6,
            is_extreme_market: false,
            trading_session: TradingSession::American,
            computed_at: Utc::now(),
            sample_count: 100,
        }
    }

    fn candidate() -> SignalCandidate {
        SignalCandidate {
            id: "c-1".to_string(),
            symbol: "BTCUSDT".to_string(),
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
                momentum: 0.4,
                funding_rate: 0.0001,
                orderbook_imbalance: 0.1,
            },
            data_completeness: 0.9,
            signal_clarity: 0.8,
        }
    }

    #[test]
    fn score_is_in_unit_interval() {
        let (score, _) = scorer().score(
            &candidate(),
            &regime_trending_up(),
            &weight_snapshot(),
            Utc::now(),
        );
        assert!((0.0..=1.0).contains(&score.comprehensive_score));
        assert!(score.ai_enhancement.abs() <= AI_ENHANCEMENT_BOUND + 1e-12);
    }

    #[test]
    fn scoring_is_idempotent_for_fixed_inputs() {
        let s = scorer();
        let c = candidate();
        let regime = regime_trending_up();
        let snap = weight_snapshot();
        let as_of = c.timestamp + chrono::Duration::seconds(10);

        let (a, _) = s.score(&c, &regime, &snap, as_of);
        let (b, _) = s.score(&c, &regime, &snap, as_of);
        assert_eq!(a.comprehensive_score.to_bits(), b.comprehensive_score.to_bits());
    }

    #[test]
    fn aligned_trend_scores_higher_than_contrarian() {
        let s = scorer();
        let regime = regime_trending_up();
        let snap = weight_snapshot();
        let as_of = Utc::now();

        let long = candidate();
        let mut short = candidate();
        short.direction = Direction::Short;
        short.market_environment.momentum = -0.4;

        let (long_score, _) = s.score(&long, &regime, &snap, as_of);
        let (short_score, _) = s.score(&short, &regime, &snap, as_of);
        assert!(long_score.market_consistency > short_score.market_consistency);
        assert!(long_score.comprehensive_score > short_score.comprehensive_score);
    }

    #[test]
    fn stale_candidate_decays() {
        let s = scorer();
        let regime = regime_trending_up();
        let snap = weight_snapshot();

        let fresh = candidate();
        let mut stale = candidate();
        stale.timestamp = fresh.timestamp - chrono::Duration::seconds(1800);

        let as_of = fresh.timestamp;
        let (fresh_score, _) = s.score(&fresh, &regime, &snap, as_of);
        let (stale_score, _) = s.score(&stale, &regime, &snap, as_of);
        assert!(fresh_score.time_effect > stale_score.time_effect);
    }

    #[test]
    fn non_finite_inputs_fall_back_to_neutral_with_note() {
        let s = scorer();
        let regime = regime_trending_up();
        let snap = weight_snapshot();

        let mut c = candidate();
        c.market_environment.liquidity_score = f64::NAN;
        let (score, notes) = s.score(&c, &regime, &snap, Utc::now());
        assert!((score.liquidity_factor - NEUTRAL).abs() < f64::EPSILON);
        assert!(notes.iter().any(|n| n.contains("liquidity_score")));
        assert!((0.0..=1.0).contains(&score.comprehensive_score));
    }

    #[test]
    fn warmup_regime_yields_neutral_consistency() {
        let s = scorer();
        let neutral = MarketRegimeState::neutral();
        let (score, notes) = s.score(&candidate(), &neutral, &weight_snapshot(), Utc::now());
        assert!((score.market_consistency - NEUTRAL).abs() < f64::EPSILON);
        assert!(notes.iter().any(|n| n.contains("warming up")));
    }

    #[test]
    fn missing_snapshot_fields_reduce_data_quality() {
        let s = scorer();
        let regime = regime_trending_up();
        let snap = weight_snapshot();
        let as_of = Utc::now();

        let full = candidate();
        let mut sparse = candidate();
        sparse.technical_snapshot = TechnicalSnapshot {
            rsi: Some(55.0),
            ..Default::default()
        };

        let (full_score, _) = s.score(&full, &regime, &snap, as_of);
        let (sparse_score, _) = s.score(&sparse, &regime, &snap, as_of);
        assert!(full_score.data_quality > sparse_score.data_quality);
    }
}
