// =============================================================================
// Quality Control Gate — strength, liquidity, and composite risk
// =============================================================================
//
// Sequential checks; the first failure is terminal:
//
//   1. signal_strength >= threshold (default 70)       else FAIL_STRENGTH
//   2. liquidity_score >= threshold (default 0.6)      else FAIL_LIQUIDITY
//   3. composite risk <= threshold (default 0.3)       else FAIL_RISK
//
// Composite risk = 0.30 × volatility risk
//               + 0.25 × liquidity risk
//               + 0.20 × technical extremity risk
//               + 0.15 × momentum risk
//               + 0.10 × data-completeness risk
//
// Risk level is bucketed at 0.2 / 0.4 / 0.6 / 0.8.
//
// Internal errors fail open to PASS with an empty assessment (fail-closed
// flips this to FAIL_RISK) — the same explicit contract as the dedup engine.
// =============================================================================

use tracing::{debug, warn};

use crate::candidate::{RiskAssessment, RiskFactor, SignalCandidate};
use crate::runtime_config::QualityConfig;
use crate::types::{QualityVerdict, RiskLevel};

/// Composite risk factor weights.
const VOLATILITY_RISK_WEIGHT: f64 = 0.30;
const LIQUIDITY_RISK_WEIGHT: f64 = 0.25;
const TECHNICAL_RISK_WEIGHT: f64 = 0.20;
const MOMENTUM_RISK_WEIGHT: f64 = 0.15;
const DATA_RISK_WEIGHT: f64 = 0.10;

/// Outcome of a gate evaluation.
#[derive(Debug, Clone)]
pub struct QualityEvaluation {
    pub verdict: QualityVerdict,
    pub risk: RiskAssessment,
    pub notes: Vec<String>,
}

pub struct QualityGate {
    config: QualityConfig,
    fail_open: bool,
}

impl QualityGate {
    pub fn new(config: QualityConfig, fail_open: bool) -> Self {
        Self { config, fail_open }
    }

    /// Run the full three-step gate on a candidate.
    pub fn evaluate(&self, candidate: &SignalCandidate) -> QualityEvaluation {
        match self.try_evaluate(candidate) {
            Ok(evaluation) => evaluation,
            Err(reason) => {
                warn!(
                    symbol = %candidate.symbol,
                    reason,
                    fail_open = self.fail_open,
                    "quality gate internal error"
                );
                if self.fail_open {
                    QualityEvaluation {
                        verdict: QualityVerdict::Pass,
                        risk: RiskAssessment::empty(),
                        notes: vec![format!(
                            "quality gate error ({reason}); failing open to PASS"
                        )],
                    }
                } else {
                    QualityEvaluation {
                        verdict: QualityVerdict::FailRisk,
                        risk: RiskAssessment::empty(),
                        notes: vec![format!(
                            "quality gate error ({reason}); failing closed to FAIL_RISK"
                        )],
                    }
                }
            }
        }
    }

    fn try_evaluate(&self, candidate: &SignalCandidate) -> Result<QualityEvaluation, String> {
        let mut notes = Vec::new();

        // ── 1. Strength ──────────────────────────────────────────────────
        if candidate.signal_strength < self.config.min_signal_strength {
            notes.push(format!(
                "quality: strength {:.1} < {:.1}",
                candidate.signal_strength, self.config.min_signal_strength
            ));
            return Ok(QualityEvaluation {
                verdict: QualityVerdict::FailStrength,
                risk: RiskAssessment::empty(),
                notes,
            });
        }

        // ── 2. Liquidity ─────────────────────────────────────────────────
        let liquidity = candidate.market_environment.liquidity_score;
        if !liquidity.is_finite() {
            return Err("non-finite liquidity score".to_string());
        }
        if liquidity < self.config.min_liquidity_score {
            notes.push(format!(
                "quality: liquidity {:.2} < {:.2}",
                liquidity, self.config.min_liquidity_score
            ));
            return Ok(QualityEvaluation {
                verdict: QualityVerdict::FailLiquidity,
                risk: RiskAssessment::empty(),
                notes,
            });
        }

        // ── 3. Composite risk ────────────────────────────────────────────
        let risk = self.assess_risk(candidate)?;
        if risk.overall_risk_score > self.config.max_overall_risk {
            notes.push(format!(
                "quality: composite risk {:.3} > {:.3} ({})",
                risk.overall_risk_score, self.config.max_overall_risk, risk.level
            ));
            return Ok(QualityEvaluation {
                verdict: QualityVerdict::FailRisk,
                risk,
                notes,
            });
        }

        notes.push(format!(
            "quality: PASS (risk {:.3}, {})",
            risk.overall_risk_score, risk.level
        ));
        debug!(
            symbol = %candidate.symbol,
            risk = format!("{:.3}", risk.overall_risk_score),
            level = %risk.level,
            "quality gate passed"
        );

        Ok(QualityEvaluation {
            verdict: QualityVerdict::Pass,
            risk,
            notes,
        })
    }

    /// Build the weighted composite risk assessment.
    fn assess_risk(&self, candidate: &SignalCandidate) -> Result<RiskAssessment, String> {
        let env = &candidate.market_environment;

        let volatility_risk = ratio_risk(env.volatility, self.config.volatility_risk_scale)?;
        let liquidity_risk = (1.0 - env.liquidity_score).clamp(0.0, 1.0);
        let technical_risk = technical_extremity(candidate);
        let momentum_risk = ratio_risk(env.momentum.abs(), self.config.momentum_risk_scale)?;
        let data_risk = (1.0 - candidate.data_completeness).clamp(0.0, 1.0);

        let factors = vec![
            RiskFactor {
                name: "volatility".to_string(),
                score: volatility_risk,
                weight: VOLATILITY_RISK_WEIGHT,
            },
            RiskFactor {
                name: "liquidity".to_string(),
                score: liquidity_risk,
                weight: LIQUIDITY_RISK_WEIGHT,
            },
            RiskFactor {
                name: "technical_extremity".to_string(),
                score: technical_risk,
                weight: TECHNICAL_RISK_WEIGHT,
            },
            RiskFactor {
                name: "momentum".to_string(),
                score: momentum_risk,
                weight: MOMENTUM_RISK_WEIGHT,
            },
            RiskFactor {
                name: "data_completeness".to_string(),
                score: data_risk,
                weight: DATA_RISK_WEIGHT,
            },
        ];

        let overall: f64 = factors.iter().map(|f| f.score * f.weight).sum();
        if !overall.is_finite() {
            return Err("non-finite composite risk".to_string());
        }
        let overall = overall.clamp(0.0, 1.0);

        Ok(RiskAssessment {
            factors,
            overall_risk_score: overall,
            level: RiskLevel::from_score(overall),
        })
    }
}

/// Linear risk ramp: 0 at zero, 1 at or beyond `scale`.
fn ratio_risk(value: f64, scale: f64) -> Result<f64, String> {
    if !value.is_finite() {
        return Err("non-finite risk input".to_string());
    }
    if scale <= 0.0 {
        return Ok(0.0);
    }
    Ok((value / scale).clamp(0.0, 1.0))
}

/// Risk contribution from indicators sitting at their extremes. Missing
/// indicators contribute nothing.
fn technical_extremity(candidate: &SignalCandidate) -> f64 {
    let snapshot = &candidate.technical_snapshot;
    let mut worst: f64 = 0.0;

    if let Some(rsi) = snapshot.rsi {
        if rsi.is_finite() {
            // Full risk at RSI 90+/10-, none inside [30, 70].
            let extremity = if rsi >= 70.0 {
                (rsi - 70.0) / 20.0
            } else if rsi <= 30.0 {
                (30.0 - rsi) / 20.0
            } else {
                0.0
            };
            worst = worst.max(extremity.clamp(0.0, 1.0));
        }
    }

    if let Some(williams) = snapshot.williams_r {
        if williams.is_finite() {
            // Williams %R lives in [-100, 0]; extremes are above -20 / below -80.
            let extremity = if williams >= -20.0 {
                (williams + 20.0) / 20.0
            } else if williams <= -80.0 {
                (-80.0 - williams) / 20.0
            } else {
                0.0
            };
            worst = worst.max(extremity.clamp(0.0, 1.0));
        }
    }

    if let Some(stochastic) = snapshot.stochastic {
        if stochastic.is_finite() {
            let extremity = if stochastic >= 80.0 {
                (stochastic - 80.0) / 20.0
            } else if stochastic <= 20.0 {
                (20.0 - stochastic) / 20.0
            } else {
                0.0
            };
            worst = worst.max(extremity.clamp(0.0, 1.0));
        }
    }

    worst
}
