//! Catalyst factor
//!
//! Heat from derivatives positioning: cross-venue funding divergence plus
//! volatility compression (coiled ranges tend to precede moves). Unlike
//! the other raw factors this one joins the weighted composite directly
//! and is never residualized.

use crate::types::Kline;

/// Volatility compression over a 1h series: recent 24-bar range versus the
/// prior baseline. Below 1.0 means the market is coiling.
pub fn compression_ratio(bars: &[Kline]) -> f64 {
    if bars.len() < 48 {
        return 1.0;
    }
    let range = |window: &[Kline]| -> f64 {
        window
            .iter()
            .filter(|b| b.close > 0.0)
            .map(|b| (b.high - b.low) / b.close)
            .sum::<f64>()
            / window.len() as f64
    };
    let split = bars.len() - 24;
    let baseline = range(&bars[..split]);
    let recent = range(&bars[split..]);
    if baseline <= 0.0 {
        return 1.0;
    }
    recent / baseline
}

/// Catalyst heat in roughly [0, 100]
///
/// Funding divergence (absolute z-score, saturating at 4 sigma) counts for
/// 60 points, compression for 40.
pub fn catalyst_factor(funding_z: Option<f64>, bars: &[Kline]) -> f64 {
    let funding_component = funding_z
        .map(|z| (z.abs() / 4.0).min(1.0) * 60.0)
        .unwrap_or(0.0);

    let ratio = compression_ratio(bars);
    // Full compression credit at 0.5x baseline, none at 1.0x or wider
    let compression_component = ((1.0 - ratio) / 0.5).clamp(0.0, 1.0) * 40.0;

    funding_component + compression_component
}
