//! Quality factor
//!
//! Tradability summary from the best available book: tight spreads and
//! thick two-sided depth score high, wide or one-sided books score low.
//! Without a book the factor degrades to a bar-stability proxy so the
//! symbol still ranks.

use crate::types::{BookSnapshot, Kline};

/// Depth at which quality saturates
const DEPTH_SATURATION_USD: f64 = 500_000.0;
/// Spread at which the spread component bottoms out
const SPREAD_FLOOR_BPS: f64 = 200.0;

/// Quality from spread plus two-sided depth within 2% of mid
fn book_quality(book: &BookSnapshot) -> f64 {
    let Some(spread_bps) = book.spread_bps() else {
        return 0.0;
    };
    let spread_component = (1.0 - (spread_bps / SPREAD_FLOOR_BPS).min(1.0)) * 50.0;

    let depth = book.depth_bid_usd(0.02).min(book.depth_ask_usd(0.02));
    let depth_component = (depth / DEPTH_SATURATION_USD).min(1.0) * 50.0;

    spread_component + depth_component
}

/// Fallback proxy: inverse of average bar range when no book is available
fn bar_stability(bars: &[Kline]) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    let mean_range: f64 = bars
        .iter()
        .filter(|b| b.close > 0.0)
        .map(|b| (b.high - b.low) / b.close)
        .sum::<f64>()
        / bars.len() as f64;
    // 2% mean hourly range or wider scores zero
    ((1.0 - (mean_range / 0.02).min(1.0)) * 50.0).max(0.0)
}

/// Combined quality factor in roughly [0, 100]
pub fn quality_factor(book: Option<&BookSnapshot>, bars: &[Kline]) -> f64 {
    match book {
        Some(book) => book_quality(book),
        None => bar_stability(bars),
    }
}
