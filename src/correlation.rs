// =============================================================================
// Correlation/Conflict Resolver — candidate vs. tracked positions
// =============================================================================
//
// Checks an incoming candidate against (a) the currently tracked position for
// its own symbol and (b) positions in the symbol's static correlated group.
//
// Decision:
//   - opposite direction + confidence improvement ≥ large threshold
//       → REPLACE_CANDIDATE
//   - same direction + confidence improvement ≥ small threshold
//       → STRENGTHEN_CANDIDATE
//   - otherwise → INDEPENDENT_NEW
//
// Correlated-group positions are annotated only; they never block or allow.
//
// The position registry is the only externally-mutable shared state in the
// core: the downstream execution layer keeps it in sync via
// `update_position` / `remove_position`. Partitioned by symbol (DashMap) so
// concurrent same-symbol updates serialise on the shard entry.
// =============================================================================

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidate::{CandidateSummary, SignalCandidate};
use crate::runtime_config::CorrelationConfig;
use crate::types::{CorrelationVerdict, Direction, SignalSource};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Summary of the position currently tracked for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationPositionEntry {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub signal_strength: f64,
    pub source: SignalSource,
    pub tracked_since: DateTime<Utc>,
}

/// Outcome of a correlation analysis.
#[derive(Debug, Clone)]
pub struct CorrelationAnalysis {
    pub verdict: CorrelationVerdict,
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct CorrelationResolver {
    config: CorrelationConfig,
    positions: DashMap<String, CorrelationPositionEntry>,
}

impl CorrelationResolver {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            positions: DashMap::new(),
        }
    }

    /// Analyse a candidate against the tracked position registry.
    pub fn analyze(&self, candidate: &SignalCandidate) -> CorrelationAnalysis {
        let mut notes = Vec::new();

        let verdict = match self.positions.get(&candidate.symbol) {
            Some(position) => {
                let improvement = candidate.confidence - position.confidence;

                if candidate.direction == position.direction.opposite()
                    && improvement >= self.config.replace_confidence_jump
                {
                    notes.push(format!(
                        "correlation: opposite {} position (conf {:.2} → {:.2}); replace",
                        position.direction, position.confidence, candidate.confidence
                    ));
                    CorrelationVerdict::ReplaceCandidate
                } else if candidate.direction == position.direction
                    && improvement >= self.config.strengthen_confidence_jump
                {
                    notes.push(format!(
                        "correlation: aligned {} position (conf {:.2} → {:.2}); strengthen",
                        position.direction, position.confidence, candidate.confidence
                    ));
                    CorrelationVerdict::StrengthenCandidate
                } else {
                    notes.push(format!(
                        "correlation: tracked {} position, improvement {:.3} below thresholds",
                        position.direction, improvement
                    ));
                    CorrelationVerdict::IndependentNew
                }
            }
            None => {
                notes.push("correlation: no tracked position for symbol".to_string());
                CorrelationVerdict::IndependentNew
            }
        };

        // Annotate positions held in correlated symbols. Informational only.
        for peer in self.correlated_peers(&candidate.symbol) {
            if let Some(position) = self.positions.get(&peer) {
                notes.push(format!(
                    "correlation: correlated {} holds {} position (conf {:.2})",
                    peer, position.direction, position.confidence
                ));
            }
        }

        debug!(
            symbol = %candidate.symbol,
            verdict = %verdict,
            "correlation analysis complete"
        );

        CorrelationAnalysis { verdict, notes }
    }

    /// Register or replace the tracked position for a symbol. Called by the
    /// downstream execution layer when it actually acts on a candidate.
    pub fn update_position(&self, summary: &CandidateSummary) {
        let entry = CorrelationPositionEntry {
            symbol: summary.symbol.clone(),
            direction: summary.direction,
            confidence: summary.confidence,
            signal_strength: summary.signal_strength,
            source: summary.source,
            tracked_since: Utc::now(),
        };
        info!(
            symbol = %entry.symbol,
            direction = %entry.direction,
            confidence = entry.confidence,
            "tracked position updated"
        );
        self.positions.insert(summary.symbol.clone(), entry);
    }

    /// Clear the tracked position for a symbol (position closed downstream).
    /// Returns whether a position was actually tracked.
    pub fn remove_position(&self, symbol: &str) -> bool {
        let removed = self.positions.remove(symbol).is_some();
        if removed {
            info!(symbol, "tracked position removed");
        }
        removed
    }

    /// Snapshot of the tracked position for a symbol, if any.
    pub fn position(&self, symbol: &str) -> Option<CorrelationPositionEntry> {
        self.positions.get(symbol).map(|p| p.value().clone())
    }

    /// All currently tracked positions (for the observability surface).
    pub fn all_positions(&self) -> Vec<CorrelationPositionEntry> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }

    /// Other symbols in any static correlated group containing `symbol`.
    fn correlated_peers(&self, symbol: &str) -> Vec<String> {
        let mut peers = Vec::new();
        for group in &self.config.correlated_groups {
            if group.iter().any(|s| s == symbol) {
                peers.extend(group.iter().filter(|s| *s != symbol).cloned());
            }
        }
        peers
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{MarketEnvironment, TechnicalSnapshot};

    fn candidate(symbol: &str, direction: Direction, confidence: f64) -> SignalCandidate {
        SignalCandidate {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction,
            signal_strength: 75.0,
            confidence,
            source: SignalSource::Standardizer,
            timestamp: Utc::now(),
            technical_snapshot: TechnicalSnapshot::default(),
            market_environment: MarketEnvironment::default(),
            data_completeness: 0.9,
            signal_clarity: 0.8,
        }
    }

    fn resolver() -> CorrelationResolver {
        CorrelationResolver::new(CorrelationConfig::default())
    }

    #[test]
    fn no_position_is_independent() {
        let r = resolver();
        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Long, 0.7));
        assert_eq!(analysis.verdict, CorrelationVerdict::IndependentNew);
    }

    #[test]
    fn opposite_with_large_jump_replaces() {
        let r = resolver();
        r.update_position(&candidate("BTCUSDT", Direction::Long, 0.55).summary());

        // Opposite direction, confidence jump 0.20 ≥ 0.15 threshold.
        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Short, 0.75));
        assert_eq!(analysis.verdict, CorrelationVerdict::ReplaceCandidate);
    }

    #[test]
    fn opposite_with_small_jump_is_independent() {
        let r = resolver();
        r.update_position(&candidate("BTCUSDT", Direction::Long, 0.70).summary());

        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Short, 0.75));
        assert_eq!(analysis.verdict, CorrelationVerdict::IndependentNew);
    }

    #[test]
    fn aligned_with_improvement_strengthens() {
        let r = resolver();
        r.update_position(&candidate("BTCUSDT", Direction::Long, 0.60).summary());

        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Long, 0.70));
        assert_eq!(analysis.verdict, CorrelationVerdict::StrengthenCandidate);
    }

    #[test]
    fn aligned_without_improvement_is_independent() {
        let r = resolver();
        r.update_position(&candidate("BTCUSDT", Direction::Long, 0.70).summary());

        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Long, 0.70));
        assert_eq!(analysis.verdict, CorrelationVerdict::IndependentNew);
    }

    #[test]
    fn correlated_group_positions_are_annotated_not_blocking() {
        let r = resolver();
        r.update_position(&candidate("ETHUSDT", Direction::Short, 0.8).summary());

        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Long, 0.7));
        assert_eq!(analysis.verdict, CorrelationVerdict::IndependentNew);
        assert!(analysis
            .notes
            .iter()
            .any(|n| n.contains("correlated ETHUSDT")));
    }

    #[test]
    fn remove_position_clears_registry() {
        let r = resolver();
        r.update_position(&candidate("BTCUSDT", Direction::Long, 0.7).summary());
        assert!(r.position("BTCUSDT").is_some());

        assert!(r.remove_position("BTCUSDT"));
        assert!(!r.remove_position("BTCUSDT"));
        assert!(r.position("BTCUSDT").is_none());

        let analysis = r.analyze(&candidate("BTCUSDT", Direction::Short, 0.9));
        assert_eq!(analysis.verdict, CorrelationVerdict::IndependentNew);
    }

    #[test]
    fn update_replaces_existing_position() {
        let r = resolver();
        r.update_position(&candidate("BTCUSDT", Direction::Long, 0.6).summary());
        r.update_position(&candidate("BTCUSDT", Direction::Short, 0.8).summary());

        let pos = r.position("BTCUSDT").unwrap();
        assert_eq!(pos.direction, Direction::Short);
        assert!((pos.confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(r.all_positions().len(), 1);
    }
}
