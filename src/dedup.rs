// =============================================================================
// Deduplication Engine — multi-factor similarity against rolling history
// =============================================================================
//
// Compares an incoming candidate against the time-windowed history of
// recently ACCEPTED candidates for the same symbol:
//
//   similarity = 0.30 × strength closeness
//              + 0.20 × direction match
//              + 0.20 × source match
//              + 0.30 × technical snapshot closeness
//
// Verdict policy (checked with time-overlap and confidence-gap conditions):
//   similarity > 0.95  →  IGNORE
//   similarity > 0.80  →  DELAY_OBSERVE
//   otherwise          →  PASS   (UNIQUE when the symbol has no history)
//
// History is partitioned by symbol in a DashMap so that same-symbol
// read-modify-write serialises on the shard entry; insert order within a
// symbol therefore matches processing order.  Pruning to the window happens
// on every insert.
//
// Internal errors fail open to PASS with similarity 0 (fail-closed flips
// this to IGNORE) — an explicit, configurable contract.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::candidate::{CandidateSummary, SignalCandidate, TechnicalSnapshot};
use crate::runtime_config::DedupConfig;
use crate::types::DedupVerdict;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One retained summary of an accepted candidate.
#[derive(Debug, Clone)]
pub struct DedupHistoryEntry {
    pub summary: CandidateSummary,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a dedup analysis.
#[derive(Debug, Clone)]
pub struct DedupAnalysis {
    pub verdict: DedupVerdict,
    /// Maximum similarity found, [0, 1].
    pub similarity: f64,
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DedupEngine {
    config: DedupConfig,
    fail_open: bool,
    history: DashMap<String, Vec<DedupHistoryEntry>>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig, fail_open: bool) -> Self {
        Self {
            config,
            fail_open,
            history: DashMap::new(),
        }
    }

    /// Analyse a candidate against the symbol's windowed history.
    pub fn analyze(&self, candidate: &SignalCandidate) -> DedupAnalysis {
        match self.try_analyze(candidate) {
            Ok(analysis) => analysis,
            Err(reason) => {
                warn!(
                    symbol = %candidate.symbol,
                    reason,
                    fail_open = self.fail_open,
                    "dedup analysis error"
                );
                let (verdict, note) = if self.fail_open {
                    (
                        DedupVerdict::Pass,
                        format!("dedup error ({reason}); failing open to PASS"),
                    )
                } else {
                    (
                        DedupVerdict::Ignore,
                        format!("dedup error ({reason}); failing closed to IGNORE"),
                    )
                };
                DedupAnalysis {
                    verdict,
                    similarity: 0.0,
                    notes: vec![note],
                }
            }
        }
    }

    fn try_analyze(&self, candidate: &SignalCandidate) -> Result<DedupAnalysis, String> {
        let window_start = Utc::now() - Duration::seconds(self.config.window_secs);
        let mut notes = Vec::new();

        let entries = match self.history.get(&candidate.symbol) {
            Some(entries) => entries,
            None => {
                notes.push("no dedup history for symbol; UNIQUE".to_string());
                return Ok(DedupAnalysis {
                    verdict: DedupVerdict::Unique,
                    similarity: 0.0,
                    notes,
                });
            }
        };

        let mut max_similarity: f64 = 0.0;
        let mut best: Option<&DedupHistoryEntry> = None;
        let mut compared = 0usize;

        for entry in entries.iter().filter(|e| e.recorded_at >= window_start) {
            let similarity = self.similarity(candidate, &entry.summary)?;
            compared += 1;
            if similarity > max_similarity {
                max_similarity = similarity;
                best = Some(entry);
            }
        }

        if compared == 0 {
            notes.push("dedup window empty for symbol; UNIQUE".to_string());
            return Ok(DedupAnalysis {
                verdict: DedupVerdict::Unique,
                similarity: 0.0,
                notes,
            });
        }

        let verdict = match best {
            Some(entry) => {
                let time_gap =
                    (candidate.timestamp - entry.summary.timestamp).num_seconds().abs();
                let overlapping = time_gap <= self.config.time_overlap_secs;
                let confidence_gap =
                    (candidate.confidence - entry.summary.confidence).abs();
                let small_gap = confidence_gap < self.config.confidence_gap_max;

                notes.push(format!(
                    "dedup: max similarity {:.3} vs {} ({} entries, gap {}s, Δconf {:.3})",
                    max_similarity, entry.summary.id, compared, time_gap, confidence_gap
                ));

                if max_similarity > self.config.ignore_threshold && overlapping && small_gap {
                    DedupVerdict::Ignore
                } else if max_similarity > self.config.delay_threshold
                    && overlapping
                    && small_gap
                {
                    DedupVerdict::DelayObserve
                } else {
                    DedupVerdict::Pass
                }
            }
            None => DedupVerdict::Pass,
        };

        debug!(
            symbol = %candidate.symbol,
            verdict = %verdict,
            similarity = format!("{:.3}", max_similarity),
            compared,
            "dedup analysis complete"
        );

        Ok(DedupAnalysis {
            verdict,
            similarity: max_similarity,
            notes,
        })
    }

    /// Record an ACCEPTED candidate into the symbol's history, pruning the
    /// window in the same critical section.
    pub fn record_accepted(&self, summary: CandidateSummary) {
        let window_start = Utc::now() - Duration::seconds(self.config.window_secs);
        let mut entries = self.history.entry(summary.symbol.clone()).or_default();

        entries.push(DedupHistoryEntry {
            summary,
            recorded_at: Utc::now(),
        });

        entries.retain(|e| e.recorded_at >= window_start);
        let len = entries.len();
        if len > self.config.max_entries_per_symbol {
            entries.drain(0..len - self.config.max_entries_per_symbol);
        }
    }

    /// Number of live history entries for a symbol (post-window filter).
    pub fn history_len(&self, symbol: &str) -> usize {
        let window_start = Utc::now() - Duration::seconds(self.config.window_secs);
        self.history
            .get(symbol)
            .map(|e| e.iter().filter(|e| e.recorded_at >= window_start).count())
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Similarity
    // -------------------------------------------------------------------------

    fn similarity(
        &self,
        candidate: &SignalCandidate,
        prior: &CandidateSummary,
    ) -> Result<f64, String> {
        let strength_closeness =
            1.0 - (candidate.signal_strength - prior.signal_strength).abs() / 100.0;
        let direction_match = if candidate.direction == prior.direction {
            1.0
        } else {
            0.0
        };
        let source_match = if candidate.source == prior.source {
            1.0
        } else {
            0.0
        };
        let technical = snapshot_closeness(
            &candidate.technical_snapshot,
            &prior.technical_snapshot,
        );

        let similarity = self.config.sim_strength_weight * strength_closeness.clamp(0.0, 1.0)
            + self.config.sim_direction_weight * direction_match
            + self.config.sim_source_weight * source_match
            + self.config.sim_technical_weight * technical;

        if !similarity.is_finite() {
            return Err("non-finite similarity".to_string());
        }
        Ok(similarity.clamp(0.0, 1.0))
    }
}

/// Mean closeness over indicator fields present in BOTH snapshots, each
/// normalised by its natural scale. Neutral 0.5 when nothing overlaps.
fn snapshot_closeness(a: &TechnicalSnapshot, b: &TechnicalSnapshot) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;

    let mut field = |a: Option<f64>, b: Option<f64>, scale: f64| {
        if let (Some(a), Some(b)) = (a, b) {
            if a.is_finite() && b.is_finite() && scale > 0.0 {
                total += (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0);
                count += 1;
            }
        }
    };

    field(a.rsi, b.rsi, 100.0);
    field(a.bollinger_position, b.bollinger_position, 1.0);
    field(a.stochastic, b.stochastic, 100.0);
    field(a.williams_r, b.williams_r, 100.0);

    // Unbounded price-unit fields compare on relative difference.
    let mut relative = |a: Option<f64>, b: Option<f64>| {
        if let (Some(a), Some(b)) = (a, b) {
            if a.is_finite() && b.is_finite() {
                let denom = a.abs().max(b.abs());
                let closeness = if denom > 0.0 {
                    (1.0 - (a - b).abs() / denom).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                total += closeness;
                count += 1;
            }
        }
    };

    relative(a.macd_signal, b.macd_signal);
    relative(a.atr, b.atr);

    if count == 0 {
        0.5
    } else {
        total / count as f64
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::MarketEnvironment;
    use crate::types::{Direction, SignalSource};

    fn snapshot() -> TechnicalSnapshot {
        TechnicalSnapshot {
            rsi: Some(55.0),
            macd_signal: Some(0.3),
            bollinger_position: Some(0.5),
            atr: Some(120.0),
            stochastic: Some(42.0),
            williams_r: Some(-50.0),
        }
    }

    fn candidate(symbol: &str, strength: f64, confidence: f64) -> SignalCandidate {
        SignalCandidate {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction: Direction::Long,
            signal_strength: strength,
            confidence,
            source: SignalSource::Standardizer,
            timestamp: Utc::now(),
            technical_snapshot: snapshot(),
            market_environment: MarketEnvironment::default(),
            data_completeness: 0.9,
            signal_clarity: 0.8,
        }
    }

    fn engine() -> DedupEngine {
        DedupEngine::new(DedupConfig::default(), true)
    }

    #[test]
    fn no_history_yields_unique() {
        let e = engine();
        let analysis = e.analyze(&candidate("BTCUSDT", 72.0, 0.7));
        assert_eq!(analysis.verdict, DedupVerdict::Unique);
        assert!((analysis.similarity - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn near_identical_within_window_is_ignored() {
        let e = engine();
        let first = candidate("BTCUSDT", 72.0, 0.70);
        e.record_accepted(first.summary());

        // Two minutes later, effectively the same signal.
        let mut second = candidate("BTCUSDT", 72.5, 0.71);
        second.timestamp = first.timestamp + Duration::seconds(120);

        let analysis = e.analyze(&second);
        assert!(analysis.similarity > 0.95, "similarity {}", analysis.similarity);
        assert_eq!(analysis.verdict, DedupVerdict::Ignore);
    }

    #[test]
    fn moderately_similar_is_delayed() {
        let e = engine();
        let first = candidate("BTCUSDT", 72.0, 0.70);
        e.record_accepted(first.summary());

        // Same direction/source but visibly different strength and profile.
        let mut second = candidate("BTCUSDT", 55.0, 0.68);
        second.timestamp = first.timestamp + Duration::seconds(60);
        second.technical_snapshot.rsi = Some(40.0);
        second.technical_snapshot.stochastic = Some(25.0);
        second.technical_snapshot.bollinger_position = Some(0.25);

        let analysis = e.analyze(&second);
        assert!(
            analysis.similarity > 0.80 && analysis.similarity <= 0.95,
            "similarity {}",
            analysis.similarity
        );
        assert_eq!(analysis.verdict, DedupVerdict::DelayObserve);
    }

    #[test]
    fn large_confidence_gap_passes_even_when_similar() {
        let e = engine();
        let first = candidate("BTCUSDT", 72.0, 0.50);
        e.record_accepted(first.summary());

        let mut second = candidate("BTCUSDT", 72.0, 0.90); // Δconf 0.40
        second.timestamp = first.timestamp + Duration::seconds(60);

        let analysis = e.analyze(&second);
        assert_eq!(analysis.verdict, DedupVerdict::Pass);
    }

    #[test]
    fn outside_time_overlap_passes() {
        let e = engine();
        let mut first = candidate("BTCUSDT", 72.0, 0.70);
        // Recorded now, but signal timestamps far apart.
        first.timestamp = Utc::now() - Duration::seconds(600);
        e.record_accepted(first.summary());

        let second = candidate("BTCUSDT", 72.0, 0.70);
        let analysis = e.analyze(&second);
        assert_eq!(analysis.verdict, DedupVerdict::Pass);
    }

    #[test]
    fn different_symbols_do_not_interact() {
        let e = engine();
        e.record_accepted(candidate("BTCUSDT", 72.0, 0.7).summary());
        let analysis = e.analyze(&candidate("ETHUSDT", 72.0, 0.7));
        assert_eq!(analysis.verdict, DedupVerdict::Unique);
    }

    #[test]
    fn history_is_pruned_to_window() {
        let mut config = DedupConfig::default();
        config.max_entries_per_symbol = 3;
        let e = DedupEngine::new(config, true);

        for i in 0..10 {
            e.record_accepted(candidate("BTCUSDT", 60.0 + i as f64, 0.7).summary());
        }
        assert_eq!(e.history_len("BTCUSDT"), 3);
    }

    #[test]
    fn snapshot_closeness_neutral_when_disjoint() {
        let a = TechnicalSnapshot {
            rsi: Some(50.0),
            ..Default::default()
        };
        let b = TechnicalSnapshot {
            stochastic: Some(40.0),
            ..Default::default()
        };
        assert!((snapshot_closeness(&a, &b) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn identical_snapshots_are_fully_close() {
        let s = snapshot();
        assert!((snapshot_closeness(&s, &s) - 1.0).abs() < 1e-12);
    }
}
