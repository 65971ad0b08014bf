// =============================================================================
// Candidate Model — canonical records flowing through the triage pipeline
// =============================================================================
//
// A SignalCandidate is owned exclusively by the pipeline for the duration of
// its processing and discarded after terminal disposition; only a
// CandidateSummary survives in the dedup/correlation history windows.
//
// The technical snapshot is immutable once captured: upstream generators
// compute the indicator values, the triage core never recomputes them.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CorrelationVerdict, DedupVerdict, Direction, QualityVerdict, RiskLevel,
    SignalSource};

// ---------------------------------------------------------------------------
// Technical snapshot
// ---------------------------------------------------------------------------

/// Indicator values captured by the upstream generator at signal time.
///
/// Every field is optional: a generator that could not compute an indicator
/// simply omits it, and the scorer substitutes a conservative neutral value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    /// RSI(14), range [0, 100].
    #[serde(default)]
    pub rsi: Option<f64>,
    /// MACD signal-line value (price units).
    #[serde(default)]
    pub macd_signal: Option<f64>,
    /// Position within the Bollinger bands, range [0, 1] (0 = lower band).
    #[serde(default)]
    pub bollinger_position: Option<f64>,
    /// ATR(14) in price units.
    #[serde(default)]
    pub atr: Option<f64>,
    /// Stochastic %K, range [0, 100].
    #[serde(default)]
    pub stochastic: Option<f64>,
    /// Williams %R, range [-100, 0].
    #[serde(default)]
    pub williams_r: Option<f64>,
}

impl TechnicalSnapshot {
    /// Whether every indicator field is populated.
    pub fn is_fully_populated(&self) -> bool {
        self.rsi.is_some()
            && self.macd_signal.is_some()
            && self.bollinger_position.is_some()
            && self.atr.is_some()
            && self.stochastic.is_some()
            && self.williams_r.is_some()
    }

    /// Fraction of indicator fields that are populated, in [0, 1].
    pub fn presence_ratio(&self) -> f64 {
        let present = [
            self.rsi.is_some(),
            self.macd_signal.is_some(),
            self.bollinger_position.is_some(),
            self.atr.is_some(),
            self.stochastic.is_some(),
            self.williams_r.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        present as f64 / 6.0
    }
}

// ---------------------------------------------------------------------------
// Market environment
// ---------------------------------------------------------------------------

/// Market conditions attached to the candidate at signal time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketEnvironment {
    /// Short-horizon realised volatility (fraction, e.g. 0.01 = 1 %).
    #[serde(default)]
    pub volatility: f64,
    /// Normalised liquidity score, [0, 1].
    #[serde(default)]
    pub liquidity_score: f64,
    /// Signed momentum reading; positive = upward pressure.
    #[serde(default)]
    pub momentum: f64,
    /// Current funding rate (perpetuals), fraction.
    #[serde(default)]
    pub funding_rate: f64,
    /// Order-book imbalance, [-1, 1]; positive = bid-heavy.
    #[serde(default)]
    pub orderbook_imbalance: f64,
}

// ---------------------------------------------------------------------------
// Signal candidate
// ---------------------------------------------------------------------------

/// One proposed trade idea, normalised from an upstream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCandidate {
    /// Unique identifier (UUID v4), assigned at ingestion.
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    /// Signal strength, [0, 100].
    pub signal_strength: f64,
    /// Generator confidence, [0, 1].
    pub confidence: f64,
    pub source: SignalSource,
    pub timestamp: DateTime<Utc>,
    pub technical_snapshot: TechnicalSnapshot,
    pub market_environment: MarketEnvironment,
    /// Fraction of expected input data the generator actually had, [0, 1].
    pub data_completeness: f64,
    /// How unambiguous the signal pattern was, [0, 1].
    pub signal_clarity: f64,
}

impl SignalCandidate {
    /// Build the compact summary retained in the dedup/correlation windows
    /// after the candidate itself is discarded.
    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            direction: self.direction,
            signal_strength: self.signal_strength,
            confidence: self.confidence,
            source: self.source,
            timestamp: self.timestamp,
            technical_snapshot: self.technical_snapshot.clone(),
        }
    }
}

/// Compact summary of a candidate, retained in rolling history windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub signal_strength: f64,
    pub confidence: f64,
    pub source: SignalSource,
    pub timestamp: DateTime<Utc>,
    pub technical_snapshot: TechnicalSnapshot,
}

// ---------------------------------------------------------------------------
// Seven-dimensional score
// ---------------------------------------------------------------------------

/// Derived quality score — immutable once computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SevenDimensionalScore {
    pub strength: f64,
    pub confidence: f64,
    pub data_quality: f64,
    pub market_consistency: f64,
    pub time_effect: f64,
    pub liquidity_factor: f64,
    pub historical_accuracy: f64,
    /// Bounded adjustment from the prediction model, [-0.1, +0.1].
    pub ai_enhancement: f64,
    /// Weighted composite, strictly in [0, 1].
    pub comprehensive_score: f64,
}

// ---------------------------------------------------------------------------
// Risk assessment
// ---------------------------------------------------------------------------

/// A single named risk factor contributing to the composite risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Factor score, [0, 1].
    pub score: f64,
    /// Weight of the factor in the composite.
    pub weight: f64,
}

/// Composite risk assessment produced by the quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub factors: Vec<RiskFactor>,
    pub overall_risk_score: f64,
    pub level: RiskLevel,
}

impl RiskAssessment {
    /// Empty assessment, used on the fail-open path.
    pub fn empty() -> Self {
        Self {
            factors: Vec::new(),
            overall_risk_score: 0.0,
            level: RiskLevel::VeryLow,
        }
    }

    /// Synthetic low-risk assessment assigned to express-lane candidates.
    pub fn synthetic_low() -> Self {
        Self {
            factors: vec![RiskFactor {
                name: "express_lane".to_string(),
                score: 0.1,
                weight: 1.0,
            }],
            overall_risk_score: 0.1,
            level: RiskLevel::VeryLow,
        }
    }
}

// ---------------------------------------------------------------------------
// Pre-evaluation result
// ---------------------------------------------------------------------------

/// Terminal record for one candidate — created once, immutable afterwards,
/// handed to the downstream decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreEvaluationResult {
    pub candidate: SignalCandidate,
    pub score: SevenDimensionalScore,
    pub dedup_result: DedupVerdict,
    pub correlation_result: CorrelationVerdict,
    pub quality_result: QualityVerdict,
    pub pass_to_epl: bool,
    pub risk_assessment: RiskAssessment,
    /// Ordered human-readable trail of everything the pipeline observed.
    pub processing_notes: Vec<String>,
    /// Maximum similarity found against the dedup history, [0, 1].
    pub similarity_score: f64,
    /// Wall-clock processing time for this candidate, microseconds.
    pub processing_time_us: u64,
    /// ISO 8601 timestamp of result creation.
    pub timestamp: String,
}
