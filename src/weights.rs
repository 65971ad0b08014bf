// =============================================================================
// AI Adaptive Weight Engine — outcome-driven per-source trust
// =============================================================================
//
// Consumes decision outcomes fed back from the downstream engine and nudges
// each source's trust weight within a configured [min, max] band, so no
// source is ever driven to zero or to dominance.  A lightweight linear
// predictor is trained from the same feedback and supplies the scorer's
// bounded ai-enhancement term.
//
// Phases:  INITIAL → LEARNING ⇄ STABLE, with EMERGENCY_ADJUST layered on top
// while the regime tracker reports an extreme market (widened learning rate,
// reverts when the flag clears).
//
// Writer discipline: `learn_from_feedback` runs on the single feedback
// consumer task only.  Readers clone a prebuilt Arc snapshot and never touch
// the writer's lock, so scoring never blocks on learning.
//
// The adjustment rule itself sits behind the `WeightStrategy` trait; the
// default is a bounded linear nudge, and a heavier model can replace it
// without touching the pipeline.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidate::SignalCandidate;
use crate::runtime_config::WeightEngineConfig;
use crate::types::SignalSource;

// =============================================================================
// Types
// =============================================================================

/// Feedback record from the downstream decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub source: SignalSource,
    pub was_correct: bool,
    /// Realised return of the decision, fraction (negative for losses).
    #[serde(default)]
    pub realized_return: f64,
    pub decision_id: String,
}

/// Learning phase of the weight engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnginePhase {
    Initial,
    Learning,
    Stable,
    EmergencyAdjust,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "INITIAL"),
            Self::Learning => write!(f, "LEARNING"),
            Self::Stable => write!(f, "STABLE"),
            Self::EmergencyAdjust => write!(f, "EMERGENCY_ADJUST"),
        }
    }
}

/// Immutable snapshot of the weight state, cloned by readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceWeightSnapshot {
    /// Trust weight per source, indexed by `SignalSource::index()`.
    pub weights: [f64; 4],
    /// Rolling accuracy per source over the feedback ring, [0, 1].
    pub accuracy: [f64; 4],
    /// Feedback samples per source currently in the ring.
    pub sample_counts: [usize; 4],
    pub phase: EnginePhase,
    pub total_feedback: u64,
    pub updated_at: DateTime<Utc>,

    /// Predictor coefficients.
    bias: f64,
    source_terms: [f64; 4],

    /// Weight bounds, carried so readers can normalise trust.
    min_weight: f64,
    max_weight: f64,
}

/// Fixed feature coefficients of the pass-probability predictor. Only the
/// bias and per-source terms are learned; the feature shape stays put.
const STRENGTH_COEF: f64 = 1.2;
const CONFIDENCE_COEF: f64 = 1.0;
const CLARITY_COEF: f64 = 0.6;

/// Accuracy assumed for a source with no feedback yet.
const NEUTRAL_ACCURACY: f64 = 0.5;

impl SourceWeightSnapshot {
    fn neutral(config: &WeightEngineConfig) -> Self {
        Self {
            weights: [config.initial_weight; 4],
            accuracy: [NEUTRAL_ACCURACY; 4],
            sample_counts: [0; 4],
            phase: EnginePhase::Initial,
            total_feedback: 0,
            updated_at: Utc::now(),
            bias: 0.0,
            source_terms: [0.0; 4],
            min_weight: config.min_weight,
            max_weight: config.max_weight,
        }
    }

    pub fn source_weight(&self, source: SignalSource) -> f64 {
        self.weights[source.index()]
    }

    /// Rolling accuracy for a source; neutral 0.5 with no samples.
    pub fn source_accuracy(&self, source: SignalSource) -> f64 {
        if self.sample_counts[source.index()] == 0 {
            NEUTRAL_ACCURACY
        } else {
            self.accuracy[source.index()]
        }
    }

    /// Blend of rolling accuracy and normalised trust weight, [0, 1].
    /// This is the historical-accuracy dimension the scorer consumes.
    pub fn source_quality(&self, source: SignalSource) -> f64 {
        let trust_norm = if self.max_weight > self.min_weight {
            (self.source_weight(source) - self.min_weight)
                / (self.max_weight - self.min_weight)
        } else {
            0.5
        };
        (0.7 * self.source_accuracy(source) + 0.3 * trust_norm).clamp(0.0, 1.0)
    }

    /// Cheap linear pass-probability estimate for a candidate, (0, 1).
    pub fn predict_pass_probability(&self, candidate: &SignalCandidate) -> f64 {
        let x = self.bias
            + self.source_terms[candidate.source.index()]
            + STRENGTH_COEF * (candidate.signal_strength / 100.0 - 0.5)
            + CONFIDENCE_COEF * (candidate.confidence - 0.5)
            + CLARITY_COEF * (candidate.signal_clarity - 0.5);
        sigmoid(x)
    }
}

// =============================================================================
// Strategy seam
// =============================================================================

/// Pluggable weight-adjustment rule. The engine clamps whatever the strategy
/// returns to the configured bounds.
pub trait WeightStrategy: Send + Sync {
    /// Propose a new weight for the outcome's source.
    fn adjust(
        &self,
        current_weight: f64,
        outcome: &DecisionOutcome,
        source_accuracy: f64,
        learning_rate: f64,
    ) -> f64;

    fn name(&self) -> &'static str;
}

/// Default rule: a bounded linear nudge, scaled slightly by the realised
/// return so large wins and losses move trust faster than noise.
pub struct LinearNudgeStrategy;

impl WeightStrategy for LinearNudgeStrategy {
    fn adjust(
        &self,
        current_weight: f64,
        outcome: &DecisionOutcome,
        source_accuracy: f64,
        learning_rate: f64,
    ) -> f64 {
        let return_boost = outcome.realized_return.abs().clamp(0.0, 1.0);
        if outcome.was_correct {
            // Accurate sources converge faster towards more trust.
            current_weight + learning_rate * (1.0 + return_boost) * (0.5 + source_accuracy)
        } else {
            current_weight - learning_rate * (1.0 + return_boost)
        }
    }

    fn name(&self) -> &'static str {
        "linear_nudge"
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Consecutive low-delta updates before LEARNING settles into STABLE.
const STABLE_STREAK: usize = 10;

struct Inner {
    weights: [f64; 4],
    history: VecDeque<DecisionOutcome>,
    bias: f64,
    source_terms: [f64; 4],
    phase: EnginePhase,
    emergency: bool,
    stable_streak: usize,
    total_feedback: u64,
}

pub struct AdaptiveWeightEngine {
    config: WeightEngineConfig,
    strategy: Box<dyn WeightStrategy>,

    /// Writer-side state. Only the feedback consumer task takes this lock.
    inner: Mutex<Inner>,

    /// Published snapshot, swapped wholesale after each update.
    snapshot: RwLock<Arc<SourceWeightSnapshot>>,
}

impl AdaptiveWeightEngine {
    pub fn new(config: WeightEngineConfig) -> Self {
        Self::with_strategy(config, Box::new(LinearNudgeStrategy))
    }

    pub fn with_strategy(config: WeightEngineConfig, strategy: Box<dyn WeightStrategy>) -> Self {
        let snapshot = SourceWeightSnapshot::neutral(&config);
        info!(
            strategy = strategy.name(),
            min_weight = config.min_weight,
            max_weight = config.max_weight,
            history_capacity = config.history_capacity,
            "adaptive weight engine initialised"
        );
        Self {
            inner: Mutex::new(Inner {
                weights: [config.initial_weight; 4],
                history: VecDeque::with_capacity(config.history_capacity),
                bias: 0.0,
                source_terms: [0.0; 4],
                phase: EnginePhase::Initial,
                emergency: false,
                stable_streak: 0,
                total_feedback: 0,
            }),
            snapshot: RwLock::new(Arc::new(snapshot)),
            config,
            strategy,
        }
    }

    /// Lock-free-for-readers snapshot of the current weight state.
    pub fn snapshot(&self) -> Arc<SourceWeightSnapshot> {
        self.snapshot.read().clone()
    }

    /// Consume one decision outcome. Single-writer: called only from the
    /// feedback consumer task.
    pub fn learn_from_feedback(&self, outcome: DecisionOutcome) {
        let mut inner = self.inner.lock();
        let lr = if inner.emergency {
            self.config.emergency_learning_rate
        } else {
            self.config.learning_rate
        };

        // Bounded ring buffer of recent outcomes.
        inner.history.push_back(outcome.clone());
        while inner.history.len() > self.config.history_capacity {
            inner.history.pop_front();
        }
        inner.total_feedback += 1;

        // Rolling per-source accuracy over the ring.
        let (accuracy, sample_counts) = per_source_accuracy(&inner.history);

        // Weight nudge, clamped to the stability band.
        let idx = outcome.source.index();
        let old = inner.weights[idx];
        let proposed = self
            .strategy
            .adjust(old, &outcome, accuracy[idx], lr);
        let new = proposed.clamp(self.config.min_weight, self.config.max_weight);
        inner.weights[idx] = new;
        let delta = (new - old).abs();

        // Predictor: nudge bias and the source term towards the observed
        // outcome.
        let target = if outcome.was_correct { 1.0 } else { 0.0 };
        let predicted = sigmoid(inner.bias + inner.source_terms[idx]);
        let err = target - predicted;
        inner.bias = (inner.bias + lr * err).clamp(-2.0, 2.0);
        inner.source_terms[idx] = (inner.source_terms[idx] + lr * err).clamp(-1.0, 1.0);

        // Phase bookkeeping.
        if delta < self.config.stable_delta_epsilon {
            inner.stable_streak += 1;
        } else {
            inner.stable_streak = 0;
        }
        inner.phase = if inner.emergency {
            EnginePhase::EmergencyAdjust
        } else if (inner.total_feedback as usize) < self.config.learning_min_samples {
            EnginePhase::Initial
        } else if inner.stable_streak >= STABLE_STREAK {
            EnginePhase::Stable
        } else {
            EnginePhase::Learning
        };

        debug!(
            source = %outcome.source,
            correct = outcome.was_correct,
            weight = format!("{:.4}", new),
            delta = format!("{:.4}", delta),
            phase = %inner.phase,
            "feedback consumed"
        );

        self.publish(&inner, accuracy, sample_counts);
    }

    /// Toggle the emergency learning mode. Driven by the regime tracker's
    /// extreme-market flag; reverts to LEARNING when cleared.
    pub fn set_emergency(&self, on: bool) {
        let mut inner = self.inner.lock();
        if inner.emergency == on {
            return;
        }
        inner.emergency = on;
        inner.stable_streak = 0;
        inner.phase = if on {
            EnginePhase::EmergencyAdjust
        } else if (inner.total_feedback as usize) < self.config.learning_min_samples {
            EnginePhase::Initial
        } else {
            EnginePhase::Learning
        };
        info!(emergency = on, phase = %inner.phase, "weight engine emergency mode toggled");

        let (accuracy, sample_counts) = per_source_accuracy(&inner.history);
        self.publish(&inner, accuracy, sample_counts);
    }

    fn publish(&self, inner: &Inner, accuracy: [f64; 4], sample_counts: [usize; 4]) {
        let snapshot = SourceWeightSnapshot {
            weights: inner.weights,
            accuracy,
            sample_counts,
            phase: inner.phase,
            total_feedback: inner.total_feedback,
            updated_at: Utc::now(),
            bias: inner.bias,
            source_terms: inner.source_terms,
            min_weight: self.config.min_weight,
            max_weight: self.config.max_weight,
        };
        *self.snapshot.write() = Arc::new(snapshot);
    }
}

fn per_source_accuracy(history: &VecDeque<DecisionOutcome>) -> ([f64; 4], [usize; 4]) {
    let mut correct = [0usize; 4];
    let mut total = [0usize; 4];
    for outcome in history {
        let idx = outcome.source.index();
        total[idx] += 1;
        if outcome.was_correct {
            correct[idx] += 1;
        }
    }
    let mut accuracy = [NEUTRAL_ACCURACY; 4];
    for i in 0..4 {
        if total[i] > 0 {
            accuracy[i] = correct[i] as f64 / total[i] as f64;
        }
    }
    (accuracy, total)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{MarketEnvironment, TechnicalSnapshot};
    use crate::types::Direction;

    fn outcome(source: SignalSource, was_correct: bool) -> DecisionOutcome {
        DecisionOutcome {
            source,
            was_correct,
            realized_return: if was_correct { 0.02 } else { -0.02 },
            decision_id: "d-1".to_string(),
        }
    }

    fn candidate(strength: f64, confidence: f64) -> SignalCandidate {
        SignalCandidate {
            id: "c-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            signal_strength: strength,
            confidence,
            source: SignalSource::Standardizer,
            timestamp: Utc::now(),
            technical_snapshot: TechnicalSnapshot::default(),
            market_environment: MarketEnvironment::default(),
            data_completeness: 0.9,
            signal_clarity: 0.8,
        }
    }

    #[test]
    fn weights_never_leave_bounds() {
        let config = WeightEngineConfig::default();
        let engine = AdaptiveWeightEngine::new(config.clone());

        // Hammer one source with losses, another with wins.
        for _ in 0..500 {
            engine.learn_from_feedback(outcome(SignalSource::BasicGenerator, false));
            engine.learn_from_feedback(outcome(SignalSource::IndicatorGraph, true));
        }

        let snap = engine.snapshot();
        let loser = snap.source_weight(SignalSource::BasicGenerator);
        let winner = snap.source_weight(SignalSource::IndicatorGraph);
        assert!((loser - config.min_weight).abs() < 1e-9);
        assert!((winner - config.max_weight).abs() < 1e-9);
        assert!(loser > 0.0);
    }

    #[test]
    fn phase_progresses_from_initial() {
        let engine = AdaptiveWeightEngine::new(WeightEngineConfig::default());
        assert_eq!(engine.snapshot().phase, EnginePhase::Initial);

        for i in 0..40 {
            engine.learn_from_feedback(outcome(SignalSource::Standardizer, i % 2 == 0));
        }
        let phase = engine.snapshot().phase;
        assert!(matches!(phase, EnginePhase::Learning | EnginePhase::Stable));
    }

    #[test]
    fn saturated_weight_reaches_stable() {
        let engine = AdaptiveWeightEngine::new(WeightEngineConfig::default());
        // Once the weight pins at max, deltas vanish and the streak builds.
        for _ in 0..200 {
            engine.learn_from_feedback(outcome(SignalSource::VolatilityAdapter, true));
        }
        assert_eq!(engine.snapshot().phase, EnginePhase::Stable);
    }

    #[test]
    fn emergency_mode_widens_and_reverts() {
        let engine = AdaptiveWeightEngine::new(WeightEngineConfig::default());
        engine.set_emergency(true);
        assert_eq!(engine.snapshot().phase, EnginePhase::EmergencyAdjust);

        engine.learn_from_feedback(outcome(SignalSource::BasicGenerator, false));
        assert_eq!(engine.snapshot().phase, EnginePhase::EmergencyAdjust);

        engine.set_emergency(false);
        assert_ne!(engine.snapshot().phase, EnginePhase::EmergencyAdjust);
    }

    #[test]
    fn accuracy_tracks_ring_contents() {
        let engine = AdaptiveWeightEngine::new(WeightEngineConfig::default());
        for _ in 0..3 {
            engine.learn_from_feedback(outcome(SignalSource::Standardizer, true));
        }
        engine.learn_from_feedback(outcome(SignalSource::Standardizer, false));
        let snap = engine.snapshot();
        assert!((snap.source_accuracy(SignalSource::Standardizer) - 0.75).abs() < 1e-9);
        // Untouched source stays neutral.
        assert!(
            (snap.source_accuracy(SignalSource::BasicGenerator) - 0.5).abs() < f64::EPSILON
        );
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut config = WeightEngineConfig::default();
        config.history_capacity = 16;
        let engine = AdaptiveWeightEngine::new(config);
        for _ in 0..100 {
            engine.learn_from_feedback(outcome(SignalSource::Standardizer, true));
        }
        let snap = engine.snapshot();
        assert_eq!(snap.sample_counts[SignalSource::Standardizer.index()], 16);
    }

    #[test]
    fn predictor_outputs_probability() {
        let engine = AdaptiveWeightEngine::new(WeightEngineConfig::default());
        let snap = engine.snapshot();

        let weak = snap.predict_pass_probability(&candidate(20.0, 0.3));
        let strong = snap.predict_pass_probability(&candidate(90.0, 0.9));
        assert!(weak > 0.0 && weak < 1.0);
        assert!(strong > 0.0 && strong < 1.0);
        assert!(strong > weak);
    }

    #[test]
    fn source_quality_blends_accuracy_and_trust() {
        let engine = AdaptiveWeightEngine::new(WeightEngineConfig::default());
        for _ in 0..50 {
            engine.learn_from_feedback(outcome(SignalSource::IndicatorGraph, true));
        }
        let snap = engine.snapshot();
        let good = snap.source_quality(SignalSource::IndicatorGraph);
        let neutral = snap.source_quality(SignalSource::Standardizer);
        assert!(good > neutral);
        assert!(good <= 1.0 && neutral >= 0.0);
    }
}
