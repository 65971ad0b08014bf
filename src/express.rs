// =============================================================================
// Express Lane — fast path for high-quality-from-upstream candidates
// =============================================================================
//
// A pre-check run before dedup/correlation/gate. A candidate qualifies only
// when ALL of the following hold:
//
//   - data_completeness  >= 0.9
//   - signal_clarity     >= 0.8
//   - confidence         >= 0.75
//   - technical snapshot fully populated
//   - market volatility below the calm threshold
//   - signal_strength    >= 75
//
// Qualified candidates skip the full pipeline: the orchestrator assigns
// dedup=UNIQUE, correlation=INDEPENDENT_NEW, quality=EXCELLENT, a synthetic
// low risk score, and pass_to_epl=true — while still inserting the candidate
// into dedup history so later near-duplicates are caught.
// =============================================================================

use crate::candidate::SignalCandidate;
use crate::runtime_config::ExpressConfig;

pub struct ExpressLane;

impl ExpressLane {
    /// Returns `None` when the candidate qualifies for the fast path, or
    /// `Some(reason)` naming the first disqualifying condition.
    pub fn disqualify_reason(
        candidate: &SignalCandidate,
        market_volatility: f64,
        config: &ExpressConfig,
    ) -> Option<String> {
        if candidate.data_completeness < config.min_data_completeness {
            return Some(format!(
                "completeness {:.2} < {:.2}",
                candidate.data_completeness, config.min_data_completeness
            ));
        }
        if candidate.signal_clarity < config.min_signal_clarity {
            return Some(format!(
                "clarity {:.2} < {:.2}",
                candidate.signal_clarity, config.min_signal_clarity
            ));
        }
        if candidate.confidence < config.min_confidence {
            return Some(format!(
                "confidence {:.2} < {:.2}",
                candidate.confidence, config.min_confidence
            ));
        }
        if !candidate.technical_snapshot.is_fully_populated() {
            return Some("technical snapshot incomplete".to_string());
        }
        if !(market_volatility.is_finite() && market_volatility < config.calm_volatility_max) {
            return Some(format!(
                "volatility {:.4} not calm (< {:.4})",
                market_volatility, config.calm_volatility_max
            ));
        }
        if candidate.signal_strength < config.min_signal_strength {
            return Some(format!(
                "strength {:.1} < {:.1}",
                candidate.signal_strength, config.min_signal_strength
            ));
        }
        None
    }

    /// Convenience wrapper: does the candidate qualify?
    pub fn qualifies(
        candidate: &SignalCandidate,
        market_volatility: f64,
        config: &ExpressConfig,
    ) -> bool {
        Self::disqualify_reason(candidate, market_volatility, config).is_none()
    }
}
