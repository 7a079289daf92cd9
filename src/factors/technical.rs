//! Technical factor
//!
//! Scalar summary of oscillator state and trend persistence from the 1h
//! series: RSI(14) centered around zero blended with a moving-average
//! trend strength term. Positive values indicate bullish technicals.

use crate::types::Kline;

const RSI_PERIOD: usize = 14;

/// Wilder-smoothed RSI over the close series
pub fn rsi(bars: &[Kline], period: usize) -> Option<f64> {
    if bars.len() < period + 1 {
        return None;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for pair in closes[..period + 1].windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gain_sum += delta;
        } else {
            loss_sum -= delta;
        }
    }
    let mut avg_gain = gain_sum / period as f64;
    let mut avg_loss = loss_sum / period as f64;

    for pair in closes[period..].windows(2) {
        let delta = pair[1] - pair[0];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        // No losses at all; a fully flat series is neutral, not overbought
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Trend strength: distance of the last close from the 20-bar MA, in
/// percent, clamped to a sane band
fn trend_strength(bars: &[Kline]) -> f64 {
    if bars.len() < 21 {
        return 0.0;
    }
    let last = bars[bars.len() - 1].close;
    let ma20: f64 =
        bars[bars.len() - 21..bars.len() - 1].iter().map(|b| b.close).sum::<f64>() / 20.0;
    if ma20 <= 0.0 {
        return 0.0;
    }
    ((last / ma20 - 1.0) * 100.0).clamp(-25.0, 25.0)
}

/// Combined technical factor
///
/// 60% centered RSI + 40% trend strength. Short series degrade to the
/// components that are computable.
pub fn technical_factor(bars: &[Kline]) -> f64 {
    let rsi_component = rsi(bars, RSI_PERIOD).map(|v| v - 50.0).unwrap_or(0.0);
    0.6 * rsi_component + 0.4 * trend_strength(bars)
}
