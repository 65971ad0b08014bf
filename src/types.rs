// =============================================================================
// Shared types used across the Aurora triage engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction of a signal candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// The four upstream signal generators feeding the triage pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    BasicGenerator,
    IndicatorGraph,
    VolatilityAdapter,
    Standardizer,
}

impl SignalSource {
    /// All known sources, in a fixed order (used for weight tables).
    pub fn all() -> [SignalSource; 4] {
        [
            Self::BasicGenerator,
            Self::IndicatorGraph,
            Self::VolatilityAdapter,
            Self::Standardizer,
        ]
    }

    /// Stable index into fixed-size per-source arrays.
    pub fn index(self) -> usize {
        match self {
            Self::BasicGenerator => 0,
            Self::IndicatorGraph => 1,
            Self::VolatilityAdapter => 2,
            Self::Standardizer => 3,
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BasicGenerator => write!(f, "basic_generator"),
            Self::IndicatorGraph => write!(f, "indicator_graph"),
            Self::VolatilityAdapter => write!(f, "volatility_adapter"),
            Self::Standardizer => write!(f, "standardizer"),
        }
    }
}

/// Coarse trading session classification derived from the UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingSession {
    Asian,
    European,
    American,
}

impl TradingSession {
    /// Classify a UTC hour into a session. Overlaps are resolved in favour of
    /// the later (more liquid) session.
    pub fn from_utc_hour(hour: u32) -> Self {
        match hour {
            0..=7 => Self::Asian,
            8..=12 => Self::European,
            _ => Self::American,
        }
    }
}

impl std::fmt::Display for TradingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asian => write!(f, "Asian"),
            Self::European => write!(f, "European"),
            Self::American => write!(f, "American"),
        }
    }
}

/// Verdict of the deduplication engine for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupVerdict {
    /// No history exists for the symbol.
    Unique,
    /// History exists but nothing similar enough to matter.
    Pass,
    /// Similar to a recent candidate — hold back and observe.
    DelayObserve,
    /// Near-identical to a recent candidate — discard.
    Ignore,
}

impl DedupVerdict {
    /// Whether this verdict allows the candidate to continue downstream.
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Unique | Self::Pass)
    }
}

impl std::fmt::Display for DedupVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unique => write!(f, "UNIQUE"),
            Self::Pass => write!(f, "PASS"),
            Self::DelayObserve => write!(f, "DELAY_OBSERVE"),
            Self::Ignore => write!(f, "IGNORE"),
        }
    }
}

/// Verdict of the correlation/conflict resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationVerdict {
    /// No conflicting position — treat as a fresh idea.
    IndependentNew,
    /// Same direction as the tracked position with a meaningful confidence
    /// improvement — reinforces it.
    StrengthenCandidate,
    /// Opposite direction with a large confidence improvement — should
    /// replace the tracked position.
    ReplaceCandidate,
}

impl std::fmt::Display for CorrelationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndependentNew => write!(f, "INDEPENDENT_NEW"),
            Self::StrengthenCandidate => write!(f, "STRENGTHEN_CANDIDATE"),
            Self::ReplaceCandidate => write!(f, "REPLACE_CANDIDATE"),
        }
    }
}

/// Verdict of the quality control gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityVerdict {
    /// All gate checks cleared.
    Pass,
    /// Express-lane candidates that bypassed the full gate.
    Excellent,
    /// Signal strength below the minimum threshold.
    FailStrength,
    /// Liquidity score below the minimum threshold.
    FailLiquidity,
    /// Composite risk score above the maximum threshold.
    FailRisk,
}

impl QualityVerdict {
    /// Whether this verdict allows the candidate through the gate.
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass | Self::Excellent)
    }
}

impl std::fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Excellent => write!(f, "EXCELLENT"),
            Self::FailStrength => write!(f, "FAIL_STRENGTH"),
            Self::FailLiquidity => write!(f, "FAIL_LIQUIDITY"),
            Self::FailRisk => write!(f, "FAIL_RISK"),
        }
    }
}

/// Qualitative bucket for an overall risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    Elevated,
    High,
}

impl RiskLevel {
    /// Bucket an overall risk score at the 0.2 / 0.4 / 0.6 / 0.8 boundaries.
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::VeryLow
        } else if score < 0.4 {
            Self::Low
        } else if score < 0.6 {
            Self::Moderate
        } else if score < 0.8 {
            Self::Elevated
        } else {
            Self::High
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryLow => write!(f, "very_low"),
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::Elevated => write!(f, "elevated"),
            Self::High => write!(f, "high"),
        }
    }
}
