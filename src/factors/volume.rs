//! Volume factor
//!
//! Volume surge relative to the symbol's own baseline: the last 24h of
//! traded volume against the average daily volume over the rest of the
//! window, in log space so a doubling and a halving are symmetric.

use crate::types::Kline;

/// Average daily USD volume over a 1h bar series
///
/// Uses `close * volume` as the per-bar notional. Series shorter than a
/// day extrapolate from what exists.
pub fn adv_usd(bars: &[Kline]) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    let notional: f64 = bars.iter().map(|b| b.close * b.volume).sum();
    let days = (bars.len() as f64 / 24.0).max(1.0 / 24.0);
    notional / days
}

/// Volume surge factor from a 1h series
///
/// `ln(last 24h volume / baseline daily volume) * 25`, clamped. Zero when
/// there is no baseline to compare against.
pub fn volume_factor(bars: &[Kline]) -> f64 {
    if bars.len() < 48 {
        return 0.0;
    }
    let split = bars.len() - 24;
    let recent: f64 = bars[split..].iter().map(|b| b.volume).sum();
    let baseline_bars = &bars[..split];
    let baseline_daily: f64 =
        baseline_bars.iter().map(|b| b.volume).sum::<f64>() / (baseline_bars.len() as f64 / 24.0);

    if baseline_daily <= 0.0 || recent <= 0.0 {
        return 0.0;
    }
    ((recent / baseline_daily).ln() * 25.0).clamp(-50.0, 50.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(volumes: &[f64]) -> Vec<Kline> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| Kline {
                open_time: i as i64 * 3_600_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_adv_usd() {
        // 48 bars of 10 volume at close 100 = 48_000 notional over 2 days
        let bars = series(&vec![10.0; 48]);
        assert!((adv_usd(&bars) - 24_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_surge_positive_on_spike() {
        // 3 days of baseline 10/bar, then a day at 30/bar
        let mut volumes = vec![10.0; 72];
        volumes.extend(vec![30.0; 24]);
        let value = volume_factor(&series(&volumes));
        // ln(720/240) * 25 = ln(3) * 25 ~= 27.5
        assert!(value > 25.0 && value < 30.0, "got {}", value);
    }

    #[test]
    fn test_surge_negative_on_dryup() {
        let mut volumes = vec![10.0; 72];
        volumes.extend(vec![2.0; 24]);
        assert!(volume_factor(&series(&volumes)) < -25.0);
    }

    #[test]
    fn test_steady_volume_is_neutral() {
        let value = volume_factor(&series(&vec![10.0; 96]));
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn test_short_series_is_zero() {
        assert_eq!(volume_factor(&series(&vec![10.0; 30])), 0.0);
    }
}
