// =============================================================================
// Multi-Source Collector — normalises upstream signals into canonical form
// =============================================================================
//
// Each of the four upstream generators emits a differently-shaped record.
// They arrive as tagged variants and are converted here into one canonical
// `SignalCandidate`, eliminating any downstream per-source special-casing.
//
// Validation policy:
//   - malformed REQUIRED fields (symbol, strength, confidence out of range)
//     drop the candidate with a logged reason — never silently fabricated;
//   - missing OPTIONAL fields are tolerated with documented neutral defaults
//     (clarity 0.5, completeness derived from snapshot presence).
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::candidate::{MarketEnvironment, SignalCandidate, TechnicalSnapshot};
use crate::types::{Direction, SignalSource};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an upstream record was rejected at ingestion.
#[derive(Debug, Error, PartialEq)]
pub enum IngestError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("timestamp too far in the future: {0}")]
    FutureTimestamp(DateTime<Utc>),
}

// ---------------------------------------------------------------------------
// Raw upstream records
// ---------------------------------------------------------------------------

/// Payload fields shared by every upstream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCore {
    pub symbol: String,
    pub direction: Direction,
    /// Signal strength, expected [0, 100].
    pub signal_strength: f64,
    /// Confidence, expected [0, 1].
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub technical_snapshot: TechnicalSnapshot,
    #[serde(default)]
    pub market_environment: MarketEnvironment,
}

/// A signal as emitted by one of the four upstream generators, before
/// normalisation. The `source` tag selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawSignal {
    /// Plain rule-based generator. Emits no quality self-assessment.
    BasicGenerator {
        #[serde(flatten)]
        core: RawCore,
    },

    /// Indicator-graph evaluator. Reports how much of its graph resolved.
    IndicatorGraph {
        #[serde(flatten)]
        core: RawCore,
        /// Fraction of graph nodes that evaluated successfully, [0, 1].
        #[serde(default)]
        graph_coverage: Option<f64>,
    },

    /// Volatility-regime adapter. Strength is already vol-adjusted.
    VolatilityAdapter {
        #[serde(flatten)]
        core: RawCore,
        /// The adapter's own clarity estimate, [0, 1].
        #[serde(default)]
        clarity: Option<f64>,
    },

    /// Standardizer — closest to canonical, carries both quality fields.
    Standardizer {
        #[serde(flatten)]
        core: RawCore,
        #[serde(default)]
        data_completeness: Option<f64>,
        #[serde(default)]
        signal_clarity: Option<f64>,
    },
}

impl RawSignal {
    pub fn source(&self) -> SignalSource {
        match self {
            Self::BasicGenerator { .. } => SignalSource::BasicGenerator,
            Self::IndicatorGraph { .. } => SignalSource::IndicatorGraph,
            Self::VolatilityAdapter { .. } => SignalSource::VolatilityAdapter,
            Self::Standardizer { .. } => SignalSource::Standardizer,
        }
    }

    fn core(&self) -> &RawCore {
        match self {
            Self::BasicGenerator { core }
            | Self::IndicatorGraph { core, .. }
            | Self::VolatilityAdapter { core, .. }
            | Self::Standardizer { core, .. } => core,
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Neutral clarity assumed when a source does not self-assess.
const DEFAULT_CLARITY: f64 = 0.5;
/// Tolerated clock skew for upstream timestamps.
const MAX_FUTURE_SKEW_SECS: i64 = 5;

pub struct MultiSourceCollector;

impl MultiSourceCollector {
    /// Normalise one raw upstream record into a canonical candidate.
    ///
    /// Returns `Err` (and the caller drops the record) only for malformed
    /// required fields; optional gaps are filled with neutral defaults.
    pub fn normalize(raw: RawSignal) -> Result<SignalCandidate, IngestError> {
        let source = raw.source();
        let core = raw.core();

        if core.symbol.trim().is_empty() {
            return Err(IngestError::MissingField("symbol"));
        }
        if !core.signal_strength.is_finite()
            || !(0.0..=100.0).contains(&core.signal_strength)
        {
            return Err(IngestError::OutOfRange {
                field: "signal_strength",
                value: core.signal_strength,
            });
        }
        if !core.confidence.is_finite() || !(0.0..=1.0).contains(&core.confidence) {
            return Err(IngestError::OutOfRange {
                field: "confidence",
                value: core.confidence,
            });
        }
        if core.timestamp > Utc::now() + chrono::Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(IngestError::FutureTimestamp(core.timestamp));
        }

        // Per-source quality fields, with neutral defaults where a source
        // does not report them.
        let snapshot_presence = core.technical_snapshot.presence_ratio();
        let (data_completeness, signal_clarity) = match &raw {
            RawSignal::BasicGenerator { .. } => (snapshot_presence, DEFAULT_CLARITY),
            RawSignal::IndicatorGraph { graph_coverage, .. } => (
                graph_coverage
                    .filter(|v| v.is_finite())
                    .unwrap_or(snapshot_presence)
                    .clamp(0.0, 1.0),
                DEFAULT_CLARITY,
            ),
            RawSignal::VolatilityAdapter { clarity, .. } => (
                snapshot_presence,
                clarity
                    .filter(|v| v.is_finite())
                    .unwrap_or(DEFAULT_CLARITY)
                    .clamp(0.0, 1.0),
            ),
            RawSignal::Standardizer {
                data_completeness,
                signal_clarity,
                ..
            } => (
                data_completeness
                    .filter(|v| v.is_finite())
                    .unwrap_or(snapshot_presence)
                    .clamp(0.0, 1.0),
                signal_clarity
                    .filter(|v| v.is_finite())
                    .unwrap_or(DEFAULT_CLARITY)
                    .clamp(0.0, 1.0),
            ),
        };

        let core = raw.core().clone();
        Ok(SignalCandidate {
            id: Uuid::new_v4().to_string(),
            symbol: core.symbol.trim().to_uppercase(),
            direction: core.direction,
            signal_strength: core.signal_strength,
            confidence: core.confidence,
            source,
            timestamp: core.timestamp,
            technical_snapshot: core.technical_snapshot,
            market_environment: core.market_environment,
            data_completeness,
            signal_clarity,
        })
    }

    /// Normalise a batch, dropping malformed records with a logged reason.
    /// Returns the accepted candidates and the number dropped.
    pub fn normalize_batch(raw: Vec<RawSignal>) -> (Vec<SignalCandidate>, usize) {
        let mut accepted = Vec::with_capacity(raw.len());
        let mut dropped = 0usize;

        for signal in raw {
            let source = signal.source();
            let symbol = signal.core().symbol.clone();
            match Self::normalize(signal) {
                Ok(candidate) => accepted.push(candidate),
                Err(e) => {
                    dropped += 1;
                    warn!(%source, symbol, error = %e, "upstream record dropped at ingestion");
                }
            }
        }

        (accepted, dropped)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn core(symbol: &str, strength: f64, confidence: f64) -> RawCore {
        RawCore {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            signal_strength: strength,
            confidence,
            timestamp: Utc::now(),
            technical_snapshot: TechnicalSnapshot {
                rsi: Some(55.0),
                macd_signal: Some(0.2),
                bollinger_position: Some(0.5),
                atr: None,
                stochastic: None,
                williams_r: None,
            },
            market_environment: MarketEnvironment::default(),
        }
    }

    #[test]
    fn normalizes_basic_generator_with_defaults() {
        let raw = RawSignal::BasicGenerator {
            core: core("btcusdt", 72.0, 0.7),
        };
        let candidate = MultiSourceCollector::normalize(raw).unwrap();
        assert_eq!(candidate.symbol, "BTCUSDT");
        assert_eq!(candidate.source, SignalSource::BasicGenerator);
        // Completeness derived from snapshot presence (3 of 6 fields).
        assert!((candidate.data_completeness - 0.5).abs() < 1e-10);
        assert!((candidate.signal_clarity - DEFAULT_CLARITY).abs() < f64::EPSILON);
        assert!(!candidate.id.is_empty());
    }

    #[test]
    fn standardizer_quality_fields_pass_through() {
        let raw = RawSignal::Standardizer {
            core: core("ETHUSDT", 80.0, 0.8),
            data_completeness: Some(0.95),
            signal_clarity: Some(0.85),
        };
        let candidate = MultiSourceCollector::normalize(raw).unwrap();
        assert!((candidate.data_completeness - 0.95).abs() < f64::EPSILON);
        assert!((candidate.signal_clarity - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_out_of_range_strength() {
        let raw = RawSignal::BasicGenerator {
            core: core("BTCUSDT", 140.0, 0.7),
        };
        let err = MultiSourceCollector::normalize(raw).unwrap_err();
        assert!(matches!(
            err,
            IngestError::OutOfRange {
                field: "signal_strength",
                ..
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = RawSignal::Standardizer {
            core: core("BTCUSDT", 70.0, 1.5),
            data_completeness: None,
            signal_clarity: None,
        };
        assert!(MultiSourceCollector::normalize(raw).is_err());
    }

    #[test]
    fn rejects_empty_symbol() {
        let raw = RawSignal::BasicGenerator {
            core: core("  ", 70.0, 0.7),
        };
        assert_eq!(
            MultiSourceCollector::normalize(raw).unwrap_err(),
            IngestError::MissingField("symbol")
        );
    }

    #[test]
    fn rejects_nan_strength() {
        let raw = RawSignal::BasicGenerator {
            core: core("BTCUSDT", f64::NAN, 0.7),
        };
        assert!(MultiSourceCollector::normalize(raw).is_err());
    }

    #[test]
    fn batch_drops_malformed_keeps_valid() {
        let batch = vec![
            RawSignal::BasicGenerator {
                core: core("BTCUSDT", 72.0, 0.7),
            },
            RawSignal::BasicGenerator {
                core: core("", 72.0, 0.7),
            },
            RawSignal::IndicatorGraph {
                core: core("ETHUSDT", 65.0, 0.6),
                graph_coverage: Some(0.9),
            },
        ];
        let (accepted, dropped) = MultiSourceCollector::normalize_batch(batch);
        assert_eq!(accepted.len(), 2);
        assert_eq!(dropped, 1);
        assert!((accepted[1].data_completeness - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_signal_round_trips_with_source_tag() {
        let raw = RawSignal::VolatilityAdapter {
            core: core("SOLUSDT", 60.0, 0.55),
            clarity: Some(0.7),
        };
        let json = serde_json::to_string(&raw).unwrap();
        assert!(json.contains("\"source\":\"volatility_adapter\""));
        let back: RawSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source(), SignalSource::VolatilityAdapter);
    }
}
