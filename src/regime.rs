// =============================================================================
// Market Regime Tracker
// =============================================================================
//
// Maintains a small rolling window of recent price behaviour and classifies
// the current market into one of three regimes, plus an extreme-market flag
// consumed by the orchestrator (fast-track activation) and the adaptive
// weight engine (emergency learning rate).
//
// Classification (evaluated top-to-bottom; first match wins):
//
//   1. VOLATILE  — realised-volatility percentile above the configured bound
//   2. TRENDING  — |short-horizon price change| above the trend threshold
//   3. RANGING   — everything else
//
// Readers never pay for classification: `update` runs on its own cadence and
// swaps a prebuilt `Arc<MarketRegimeState>`; `snapshot()` clones the Arc.
// With insufficient history the tracker serves a neutral default state —
// it never blocks or errors towards callers.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime_config::RegimeConfig;
use crate::types::TradingSession;

// =============================================================================
// Types
// =============================================================================

/// High-level market regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeType {
    Trending,
    Ranging,
    Volatile,
}

impl std::fmt::Display for RegimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "TRENDING"),
            Self::Ranging => write!(f, "RANGING"),
            Self::Volatile => write!(f, "VOLATILE"),
        }
    }
}

/// One market observation pushed by the transport layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketTick {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Immutable snapshot of the classified regime. Process-wide: mutated only by
/// the tracker, read by every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRegimeState {
    pub regime_type: RegimeType,

    /// Signed short-horizon price change, percent.
    pub price_change_pct: f64,

    /// Realised volatility of the window returns (fraction).
    pub volatility: f64,

    /// Rank of the current volatility within the rolling window, [0, 1].
    pub volatility_percentile: f64,

    /// Price change or volatility beyond the configured emergency bounds.
    pub is_extreme_market: bool,

    pub trading_session: TradingSession,

    /// When this state was computed. Stale reads are acceptable, but age
    /// must stay observable.
    pub computed_at: DateTime<Utc>,

    /// Number of samples behind the classification (0 for the neutral
    /// default).
    pub sample_count: usize,
}

impl MarketRegimeState {
    /// Neutral default served until enough history accumulates.
    pub fn neutral() -> Self {
        Self {
            regime_type: RegimeType::Ranging,
            price_change_pct: 0.0,
            volatility: 0.0,
            volatility_percentile: 0.5,
            is_extreme_market: false,
            trading_session: TradingSession::from_utc_hour(Utc::now().hour()),
            computed_at: Utc::now(),
            sample_count: 0,
        }
    }

    /// Age of this snapshot in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.computed_at).num_milliseconds()
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Samples required before classification replaces the neutral default.
const MIN_SAMPLES: usize = 20;
/// Lookback (in samples) for the short-horizon price change.
const SHORT_HORIZON: usize = 12;

/// Thread-safe regime tracker. Wrapped in an `Arc` and shared across the
/// async runtime; `update`/`refresh` run on the dedicated regime task only.
pub struct MarketRegimeTracker {
    config: RegimeConfig,

    /// Rolling tick window plus rolling per-refresh volatility readings,
    /// touched only by the writer task.
    window: Mutex<WindowState>,

    /// Last computed state, swapped wholesale. Readers clone the Arc.
    state: RwLock<Arc<MarketRegimeState>>,
}

struct WindowState {
    ticks: VecDeque<MarketTick>,
    vol_history: VecDeque<f64>,
}

impl MarketRegimeTracker {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            window: Mutex::new(WindowState {
                ticks: VecDeque::new(),
                vol_history: VecDeque::new(),
            }),
            state: RwLock::new(Arc::new(MarketRegimeState::neutral())),
        }
    }

    /// Record a market observation. Cheap: no classification happens here.
    pub fn record_tick(&self, tick: MarketTick) {
        if !tick.price.is_finite() || tick.price <= 0.0 {
            return;
        }
        let mut window = self.window.lock();
        window.ticks.push_back(tick);
        while window.ticks.len() > self.config.window {
            window.ticks.pop_front();
        }
    }

    /// Recompute the regime from the current window and publish it.
    ///
    /// Runs on a fixed cadence, independent of per-candidate processing.
    /// Returns the freshly published state.
    pub fn refresh(&self) -> Arc<MarketRegimeState> {
        let new_state = {
            let mut window = self.window.lock();
            match self.classify(&mut window) {
                Some(state) => state,
                None => MarketRegimeState::neutral(),
            }
        };

        debug!(
            regime = %new_state.regime_type,
            change_pct = format!("{:.3}", new_state.price_change_pct),
            volatility = format!("{:.5}", new_state.volatility),
            percentile = format!("{:.2}", new_state.volatility_percentile),
            extreme = new_state.is_extreme_market,
            samples = new_state.sample_count,
            "regime refreshed"
        );

        let arc = Arc::new(new_state);
        *self.state.write() = arc.clone();
        arc
    }

    /// Non-blocking read of the last published state.
    pub fn snapshot(&self) -> Arc<MarketRegimeState> {
        self.state.read().clone()
    }

    /// Whether the last published state flagged an extreme market.
    pub fn is_extreme(&self) -> bool {
        self.state.read().is_extreme_market
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn classify(&self, window: &mut WindowState) -> Option<MarketRegimeState> {
        let ticks = &window.ticks;
        if ticks.len() < MIN_SAMPLES {
            return None;
        }

        // Short-horizon price change, percent.
        let last = ticks.back()?.price;
        let horizon_start = ticks[ticks.len().saturating_sub(SHORT_HORIZON)].price;
        let price_change_pct = if horizon_start > 0.0 {
            (last - horizon_start) / horizon_start * 100.0
        } else {
            0.0
        };

        // Realised volatility: stddev of log returns over the window.
        let returns: Vec<f64> = ticks
            .iter()
            .zip(ticks.iter().skip(1))
            .filter(|(a, b)| a.price > 0.0 && b.price > 0.0)
            .map(|(a, b)| (b.price / a.price).ln())
            .collect();
        let volatility = stddev(&returns);

        // Percentile rank of the current volatility within its own rolling
        // history of refresh readings.
        window.vol_history.push_back(volatility);
        while window.vol_history.len() > self.config.window {
            window.vol_history.pop_front();
        }
        let below = window
            .vol_history
            .iter()
            .filter(|v| **v <= volatility)
            .count();
        let volatility_percentile = below as f64 / window.vol_history.len() as f64;

        let is_extreme = price_change_pct.abs() >= self.config.extreme_change_pct
            || volatility >= self.config.extreme_volatility;

        let regime_type = if window.vol_history.len() >= MIN_SAMPLES
            && volatility_percentile >= self.config.volatile_percentile
        {
            RegimeType::Volatile
        } else if price_change_pct.abs() >= self.config.trend_change_pct {
            RegimeType::Trending
        } else {
            RegimeType::Ranging
        };

        Some(MarketRegimeState {
            regime_type,
            price_change_pct,
            volatility,
            volatility_percentile,
            is_extreme_market: is_extreme,
            trading_session: TradingSession::from_utc_hour(Utc::now().hour()),
            computed_at: Utc::now(),
            sample_count: ticks.len(),
        })
    }
}

/// Sample standard deviation; 0.0 for fewer than two samples.
fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    var.sqrt()
}
