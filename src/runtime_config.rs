// =============================================================================
// Runtime Configuration — Hot-reloadable triage settings with atomic save
// =============================================================================
//
// Central configuration hub for the Aurora triage engine.  Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// `validate()` is called after every load: a configuration whose dimension
// weights do not sum to 1.0 (±1e-3) is rejected outright.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_correlated_groups() -> Vec<Vec<String>> {
    vec![
        vec![
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "ADAUSDT".to_string(),
        ],
        vec!["BNBUSDT".to_string(), "SOLUSDT".to_string()],
    ]
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// --- scoring ----------------------------------------------------------------

fn default_strength_weight() -> f64 {
    0.20
}
fn default_confidence_weight() -> f64 {
    0.15
}
fn default_data_quality_weight() -> f64 {
    0.15
}
fn default_market_consistency_weight() -> f64 {
    0.15
}
fn default_time_effect_weight() -> f64 {
    0.10
}
fn default_liquidity_weight() -> f64 {
    0.10
}
fn default_historical_accuracy_weight() -> f64 {
    0.15
}
fn default_recency_half_life_secs() -> f64 {
    300.0
}

// --- dedup ------------------------------------------------------------------

fn default_dedup_window_secs() -> i64 {
    900
}
fn default_dedup_max_entries() -> usize {
    64
}
fn default_sim_strength_weight() -> f64 {
    0.30
}
fn default_sim_direction_weight() -> f64 {
    0.20
}
fn default_sim_source_weight() -> f64 {
    0.20
}
fn default_sim_technical_weight() -> f64 {
    0.30
}
fn default_ignore_threshold() -> f64 {
    0.95
}
fn default_delay_threshold() -> f64 {
    0.80
}
fn default_confidence_gap_max() -> f64 {
    0.10
}
fn default_time_overlap_secs() -> i64 {
    300
}

// --- correlation ------------------------------------------------------------

fn default_replace_confidence_jump() -> f64 {
    0.15
}
fn default_strengthen_confidence_jump() -> f64 {
    0.05
}

// --- quality gate -----------------------------------------------------------

fn default_min_signal_strength() -> f64 {
    70.0
}
fn default_min_liquidity_score() -> f64 {
    0.6
}
fn default_max_overall_risk() -> f64 {
    0.3
}
fn default_volatility_risk_scale() -> f64 {
    0.05
}
fn default_momentum_risk_scale() -> f64 {
    5.0
}

// --- express lane -----------------------------------------------------------

fn default_express_min_completeness() -> f64 {
    0.9
}
fn default_express_min_clarity() -> f64 {
    0.8
}
fn default_express_min_confidence() -> f64 {
    0.75
}
fn default_express_calm_volatility() -> f64 {
    0.02
}
fn default_express_min_strength() -> f64 {
    75.0
}

// --- adaptive weights -------------------------------------------------------

fn default_min_source_weight() -> f64 {
    0.5
}
fn default_max_source_weight() -> f64 {
    2.0
}
fn default_initial_source_weight() -> f64 {
    1.0
}
fn default_learning_rate() -> f64 {
    0.02
}
fn default_emergency_learning_rate() -> f64 {
    0.08
}
fn default_feedback_history_capacity() -> usize {
    256
}
fn default_learning_min_samples() -> usize {
    30
}
fn default_stable_delta_epsilon() -> f64 {
    0.005
}

// --- regime -----------------------------------------------------------------

fn default_regime_window() -> usize {
    240
}
fn default_regime_refresh_secs() -> u64 {
    5
}
fn default_trend_change_pct() -> f64 {
    0.8
}
fn default_extreme_change_pct() -> f64 {
    3.0
}
fn default_extreme_volatility() -> f64 {
    0.05
}
fn default_volatile_percentile() -> f64 {
    0.80
}

// --- pipeline ---------------------------------------------------------------

fn default_regime_sync_budget_ms() -> u64 {
    3
}
fn default_fusion_budget_ms() -> u64 {
    12
}
fn default_gate_budget_ms() -> u64 {
    8
}
fn default_learning_budget_ms() -> u64 {
    5
}
fn default_total_budget_ms() -> u64 {
    28
}
fn default_batch_cap() -> usize {
    5
}

// =============================================================================
// Sub-configs
// =============================================================================

/// Weights for the seven scoring dimensions. Must sum to 1.0 (±1e-3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionWeights {
    #[serde(default = "default_strength_weight")]
    pub strength: f64,
    #[serde(default = "default_confidence_weight")]
    pub confidence: f64,
    #[serde(default = "default_data_quality_weight")]
    pub data_quality: f64,
    #[serde(default = "default_market_consistency_weight")]
    pub market_consistency: f64,
    #[serde(default = "default_time_effect_weight")]
    pub time_effect: f64,
    #[serde(default = "default_liquidity_weight")]
    pub liquidity: f64,
    #[serde(default = "default_historical_accuracy_weight")]
    pub historical_accuracy: f64,
}

impl DimensionWeights {
    pub fn sum(&self) -> f64 {
        self.strength
            + self.confidence
            + self.data_quality
            + self.market_consistency
            + self.time_effect
            + self.liquidity
            + self.historical_accuracy
    }
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            strength: default_strength_weight(),
            confidence: default_confidence_weight(),
            data_quality: default_data_quality_weight(),
            market_consistency: default_market_consistency_weight(),
            time_effect: default_time_effect_weight(),
            liquidity: default_liquidity_weight(),
            historical_accuracy: default_historical_accuracy_weight(),
        }
    }
}

/// Deduplication engine tunables. The similarity constants are heuristic
/// defaults, tunable rather than authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Trailing history window per symbol, seconds.
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: i64,

    /// Hard cap on entries per symbol regardless of window.
    #[serde(default = "default_dedup_max_entries")]
    pub max_entries_per_symbol: usize,

    /// Similarity component weight: strength closeness.
    #[serde(default = "default_sim_strength_weight")]
    pub sim_strength_weight: f64,

    /// Similarity component weight: direction match.
    #[serde(default = "default_sim_direction_weight")]
    pub sim_direction_weight: f64,

    /// Similarity component weight: source match.
    #[serde(default = "default_sim_source_weight")]
    pub sim_source_weight: f64,

    /// Similarity component weight: technical snapshot closeness.
    #[serde(default = "default_sim_technical_weight")]
    pub sim_technical_weight: f64,

    /// Similarity above this (with overlap + small confidence gap) → IGNORE.
    #[serde(default = "default_ignore_threshold")]
    pub ignore_threshold: f64,

    /// Similarity above this (same conditions) → DELAY_OBSERVE.
    #[serde(default = "default_delay_threshold")]
    pub delay_threshold: f64,

    /// Maximum confidence gap for the duplicate conditions to apply.
    #[serde(default = "default_confidence_gap_max")]
    pub confidence_gap_max: f64,

    /// Candidates closer in time than this are considered overlapping.
    #[serde(default = "default_time_overlap_secs")]
    pub time_overlap_secs: i64,
}

impl DedupConfig {
    pub fn sim_weight_sum(&self) -> f64 {
        self.sim_strength_weight
            + self.sim_direction_weight
            + self.sim_source_weight
            + self.sim_technical_weight
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
            max_entries_per_symbol: default_dedup_max_entries(),
            sim_strength_weight: default_sim_strength_weight(),
            sim_direction_weight: default_sim_direction_weight(),
            sim_source_weight: default_sim_source_weight(),
            sim_technical_weight: default_sim_technical_weight(),
            ignore_threshold: default_ignore_threshold(),
            delay_threshold: default_delay_threshold(),
            confidence_gap_max: default_confidence_gap_max(),
            time_overlap_secs: default_time_overlap_secs(),
        }
    }
}

/// Correlation/conflict resolver tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Confidence improvement needed for an opposite-direction candidate to
    /// replace the tracked position.
    #[serde(default = "default_replace_confidence_jump")]
    pub replace_confidence_jump: f64,

    /// Confidence improvement needed for a same-direction candidate to count
    /// as strengthening the tracked position.
    #[serde(default = "default_strengthen_confidence_jump")]
    pub strengthen_confidence_jump: f64,

    /// Static groups of correlated symbols, annotated on analysis.
    #[serde(default = "default_correlated_groups")]
    pub correlated_groups: Vec<Vec<String>>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            replace_confidence_jump: default_replace_confidence_jump(),
            strengthen_confidence_jump: default_strengthen_confidence_jump(),
            correlated_groups: default_correlated_groups(),
        }
    }
}

/// Quality gate tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum signal strength, [0, 100].
    #[serde(default = "default_min_signal_strength")]
    pub min_signal_strength: f64,

    /// Minimum liquidity score, [0, 1].
    #[serde(default = "default_min_liquidity_score")]
    pub min_liquidity_score: f64,

    /// Maximum composite risk score, [0, 1].
    #[serde(default = "default_max_overall_risk")]
    pub max_overall_risk: f64,

    /// Volatility at or above this maps to maximum volatility risk.
    #[serde(default = "default_volatility_risk_scale")]
    pub volatility_risk_scale: f64,

    /// |momentum| at or above this maps to maximum momentum risk.
    #[serde(default = "default_momentum_risk_scale")]
    pub momentum_risk_scale: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_signal_strength: default_min_signal_strength(),
            min_liquidity_score: default_min_liquidity_score(),
            max_overall_risk: default_max_overall_risk(),
            volatility_risk_scale: default_volatility_risk_scale(),
            momentum_risk_scale: default_momentum_risk_scale(),
        }
    }
}

/// Express-lane qualification profile. ALL conditions must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressConfig {
    #[serde(default = "default_express_min_completeness")]
    pub min_data_completeness: f64,
    #[serde(default = "default_express_min_clarity")]
    pub min_signal_clarity: f64,
    #[serde(default = "default_express_min_confidence")]
    pub min_confidence: f64,
    /// Market volatility must be below this for the fast path.
    #[serde(default = "default_express_calm_volatility")]
    pub calm_volatility_max: f64,
    #[serde(default = "default_express_min_strength")]
    pub min_signal_strength: f64,
}

impl Default for ExpressConfig {
    fn default() -> Self {
        Self {
            min_data_completeness: default_express_min_completeness(),
            min_signal_clarity: default_express_min_clarity(),
            min_confidence: default_express_min_confidence(),
            calm_volatility_max: default_express_calm_volatility(),
            min_signal_strength: default_express_min_strength(),
        }
    }
}

/// Adaptive weight engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEngineConfig {
    /// Lower bound for any source weight — no source is ever driven to zero.
    #[serde(default = "default_min_source_weight")]
    pub min_weight: f64,

    /// Upper bound for any source weight — no source ever dominates.
    #[serde(default = "default_max_source_weight")]
    pub max_weight: f64,

    #[serde(default = "default_initial_source_weight")]
    pub initial_weight: f64,

    /// Per-feedback nudge magnitude in normal operation.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Widened nudge magnitude while the extreme-market flag holds.
    #[serde(default = "default_emergency_learning_rate")]
    pub emergency_learning_rate: f64,

    /// Bounded capacity of the decision-history ring buffer.
    #[serde(default = "default_feedback_history_capacity")]
    pub history_capacity: usize,

    /// Samples required before leaving the INITIAL phase.
    #[serde(default = "default_learning_min_samples")]
    pub learning_min_samples: usize,

    /// Weight delta below which an update counts towards stability.
    #[serde(default = "default_stable_delta_epsilon")]
    pub stable_delta_epsilon: f64,
}

impl Default for WeightEngineConfig {
    fn default() -> Self {
        Self {
            min_weight: default_min_source_weight(),
            max_weight: default_max_source_weight(),
            initial_weight: default_initial_source_weight(),
            learning_rate: default_learning_rate(),
            emergency_learning_rate: default_emergency_learning_rate(),
            history_capacity: default_feedback_history_capacity(),
            learning_min_samples: default_learning_min_samples(),
            stable_delta_epsilon: default_stable_delta_epsilon(),
        }
    }
}

/// Market regime tracker tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Rolling sample window size.
    #[serde(default = "default_regime_window")]
    pub window: usize,

    /// Regime recomputation cadence, seconds.
    #[serde(default = "default_regime_refresh_secs")]
    pub refresh_secs: u64,

    /// |short-horizon price change| above this percentage → Trending.
    #[serde(default = "default_trend_change_pct")]
    pub trend_change_pct: f64,

    /// |price change| above this percentage → extreme market.
    #[serde(default = "default_extreme_change_pct")]
    pub extreme_change_pct: f64,

    /// Realised volatility above this fraction → extreme market.
    #[serde(default = "default_extreme_volatility")]
    pub extreme_volatility: f64,

    /// Volatility percentile above which the regime is Volatile.
    #[serde(default = "default_volatile_percentile")]
    pub volatile_percentile: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: default_regime_window(),
            refresh_secs: default_regime_refresh_secs(),
            trend_change_pct: default_trend_change_pct(),
            extreme_change_pct: default_extreme_change_pct(),
            extreme_volatility: default_extreme_volatility(),
            volatile_percentile: default_volatile_percentile(),
        }
    }
}

/// Per-stage soft latency budgets, milliseconds. Advisory only: an overrun is
/// logged and counted, never aborts the candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBudgets {
    #[serde(default = "default_regime_sync_budget_ms")]
    pub regime_sync_ms: u64,
    #[serde(default = "default_fusion_budget_ms")]
    pub fusion_ms: u64,
    #[serde(default = "default_gate_budget_ms")]
    pub gate_ms: u64,
    #[serde(default = "default_learning_budget_ms")]
    pub learning_ms: u64,
    #[serde(default = "default_total_budget_ms")]
    pub total_ms: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            regime_sync_ms: default_regime_sync_budget_ms(),
            fusion_ms: default_fusion_budget_ms(),
            gate_ms: default_gate_budget_ms(),
            learning_ms: default_learning_budget_ms(),
            total_ms: default_total_budget_ms(),
        }
    }
}

// =============================================================================
// TriageConfig
// =============================================================================

/// Top-level runtime configuration for the Aurora triage engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Symbols the engine accepts candidates for.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub dimension_weights: DimensionWeights,

    /// Recency half-life used by the scorer's time-effect dimension, seconds.
    #[serde(default = "default_recency_half_life_secs")]
    pub recency_half_life_secs: f64,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub express: ExpressConfig,

    #[serde(default)]
    pub weight_engine: WeightEngineConfig,

    #[serde(default)]
    pub regime: RegimeConfig,

    #[serde(default)]
    pub budgets: StageBudgets,

    /// Maximum number of results emitted per batch.
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,

    /// Stage internal errors resolve to the most permissive verdict when
    /// true, or to a rejection when false.
    #[serde(default = "default_true")]
    pub fail_open: bool,

    /// Bind address for the observability API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            dimension_weights: DimensionWeights::default(),
            recency_half_life_secs: default_recency_half_life_secs(),
            dedup: DedupConfig::default(),
            correlation: CorrelationConfig::default(),
            quality: QualityConfig::default(),
            express: ExpressConfig::default(),
            weight_engine: WeightEngineConfig::default(),
            regime: RegimeConfig::default(),
            budgets: StageBudgets::default(),
            batch_cap: default_batch_cap(),
            fail_open: true,
            bind_addr: default_bind_addr(),
        }
    }
}

impl TriageConfig {
    /// Load configuration from a JSON file at `path` and validate it.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning. An invalid configuration (e.g.
    /// dimension weights not summing to 1.0) is rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read triage config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse triage config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            batch_cap = config.batch_cap,
            fail_open = config.fail_open,
            "triage config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise triage config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "triage config saved (atomic)");
        Ok(())
    }

    /// Reject configurations that would produce meaningless scores or
    /// unstable learning.
    pub fn validate(&self) -> Result<()> {
        let dim_sum = self.dimension_weights.sum();
        if (dim_sum - 1.0).abs() > 1e-3 {
            bail!("dimension weights sum to {dim_sum:.4}, expected 1.0 (±1e-3)");
        }

        let sim_sum = self.dedup.sim_weight_sum();
        if (sim_sum - 1.0).abs() > 1e-3 {
            bail!("similarity weights sum to {sim_sum:.4}, expected 1.0 (±1e-3)");
        }

        if self.dedup.delay_threshold >= self.dedup.ignore_threshold {
            bail!(
                "dedup delay threshold {} must be below ignore threshold {}",
                self.dedup.delay_threshold,
                self.dedup.ignore_threshold
            );
        }

        let w = &self.weight_engine;
        if !(w.min_weight > 0.0 && w.min_weight < w.max_weight) {
            bail!(
                "source weight bounds must satisfy 0 < min < max (got {} .. {})",
                w.min_weight,
                w.max_weight
            );
        }
        if w.initial_weight < w.min_weight || w.initial_weight > w.max_weight {
            bail!(
                "initial source weight {} outside bounds [{}, {}]",
                w.initial_weight,
                w.min_weight,
                w.max_weight
            );
        }

        if self.batch_cap == 0 {
            bail!("batch cap must be at least 1");
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = TriageConfig::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.dimension_weights.sum() - 1.0).abs() < 1e-9);
        assert!((cfg.dedup.sim_weight_sum() - 1.0).abs() < 1e-9);
        assert_eq!(cfg.batch_cap, 5);
        assert!(cfg.fail_open);
        assert!((cfg.quality.min_signal_strength - 70.0).abs() < f64::EPSILON);
        assert!((cfg.quality.min_liquidity_score - 0.6).abs() < f64::EPSILON);
        assert!((cfg.quality.max_overall_risk - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_dimension_weights_rejected() {
        let mut cfg = TriageConfig::default();
        cfg.dimension_weights.strength = 0.5; // sum now 1.30
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("dimension weights"));
    }

    #[test]
    fn bad_similarity_weights_rejected() {
        let mut cfg = TriageConfig::default();
        cfg.dedup.sim_technical_weight = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_dedup_thresholds_rejected() {
        let mut cfg = TriageConfig::default();
        cfg.dedup.delay_threshold = 0.97;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_weight_bounds_rejected() {
        let mut cfg = TriageConfig::default();
        cfg.weight_engine.min_weight = 2.5; // above max
        assert!(cfg.validate().is_err());

        let mut cfg = TriageConfig::default();
        cfg.weight_engine.initial_weight = 3.0; // outside bounds
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: TriageConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.dedup.window_secs, 900);
        assert!((cfg.dedup.ignore_threshold - 0.95).abs() < f64::EPSILON);
        assert!((cfg.dedup.delay_threshold - 0.80).abs() < f64::EPSILON);
        assert_eq!(cfg.budgets.total_ms, 28);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETHUSDT"], "batch_cap": 3, "fail_open": false }"#;
        let cfg: TriageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.batch_cap, 3);
        assert!(!cfg.fail_open);
        assert!((cfg.express.min_confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = TriageConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: TriageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.batch_cap, cfg2.batch_cap);
        assert!((cfg.dimension_weights.sum() - cfg2.dimension_weights.sum()).abs() < 1e-12);
    }
}
