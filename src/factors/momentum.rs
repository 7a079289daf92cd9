//! Protected momentum factor
//!
//! Multi-timeframe percentage returns from the 1h close series, combined
//! with the active profile's timeframe weights. This factor is never
//! residualized.

use crate::regime::MomentumWeights;
use crate::types::Kline;
use serde::{Deserialize, Serialize};

/// Percentage returns over the fixed momentum timeframes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeReturns {
    pub r1h: f64,
    pub r4h: f64,
    pub r12h: f64,
    pub r24h: f64,
}

/// Percentage return looking back `bars_back` 1h bars from the newest close
fn pct_return(bars: &[Kline], bars_back: usize) -> f64 {
    if bars.len() <= bars_back {
        return 0.0;
    }
    let last = bars[bars.len() - 1].close;
    let prior = bars[bars.len() - 1 - bars_back].close;
    if prior <= 0.0 {
        return 0.0;
    }
    (last / prior - 1.0) * 100.0
}

/// Returns over {1h, 4h, 12h, 24h} from a 1h bar series
pub fn timeframe_returns(bars: &[Kline]) -> TimeframeReturns {
    TimeframeReturns {
        r1h: pct_return(bars, 1),
        r4h: pct_return(bars, 4),
        r12h: pct_return(bars, 12),
        r24h: pct_return(bars, 24),
    }
}

/// Weighted momentum core: `w1*r(1h) + w4*r(4h) + w12*r(12h) + w24*r(24h)`
pub fn momentum_core(returns: &TimeframeReturns, weights: &MomentumWeights) -> f64 {
    weights.h1 * returns.r1h
        + weights.h4 * returns.r4h
        + weights.h12 * returns.r12h
        + weights.h24 * returns.r24h
}

/// 24h momentum in percent, used by the fatigue gate
pub fn momentum_24h_pct(bars: &[Kline]) -> f64 {
    pct_return(bars, 24)
}

/// 4h acceleration: change of the 4h return over the last 4 bars
pub fn acceleration_4h_pct(bars: &[Kline]) -> f64 {
    if bars.len() < 9 {
        return 0.0;
    }
    let now = pct_return(bars, 4);
    let prior = pct_return(&bars[..bars.len() - 4], 4);
    now - prior
}
