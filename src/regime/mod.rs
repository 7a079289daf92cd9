//! Market regime detection
//!
//! Classifies the market into trending / choppy / high-vol from
//! universe-wide inputs (7d realized volatility, breadth above the 20-bar
//! MA, vol-of-vol) and selects the weight profile used by the scorer.
//! Transitions happen only at regime ticks and require `confirm_ticks`
//! consecutive agreeing classifications (two by default); between ticks
//! the cached regime is authoritative. Detector failure keeps the last
//! known good state and sets a degraded flag.

use crate::config::RegimeConfig;
use crate::error::ScanError;
use crate::types::Kline;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Market regime label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    Trending,
    Choppy,
    HighVol,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Trending => "trending",
            RegimeLabel::Choppy => "choppy",
            RegimeLabel::HighVol => "high_vol",
        }
    }
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Momentum timeframe weights (fractions over 1h/4h/12h/24h returns)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentumWeights {
    pub h1: f64,
    pub h4: f64,
    pub h12: f64,
    pub h24: f64,
}

impl MomentumWeights {
    pub fn sum(&self) -> f64 {
        self.h1 + self.h4 + self.h12 + self.h24
    }
}

/// Factor weight profile selected by the active regime
///
/// Fractions over momentum/technical/volume/quality/catalyst summing to 1.
/// Social never appears here: it is additive-only downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub name: String,
    pub momentum: f64,
    pub technical: f64,
    pub volume: f64,
    pub quality: f64,
    pub catalyst: f64,
    pub momentum_timeframes: MomentumWeights,
}

impl WeightProfile {
    pub fn sum(&self) -> f64 {
        self.momentum + self.technical + self.volume + self.quality + self.catalyst
    }

    /// Both the factor weights and the momentum timeframe weights must be
    /// proper fractions
    pub fn validate(&self) -> Result<(), ScanError> {
        if (self.sum() - 1.0).abs() > 1e-9 {
            return Err(ScanError::Validation(format!(
                "profile '{}' weights sum to {}, expected 1",
                self.name,
                self.sum()
            )));
        }
        if (self.momentum_timeframes.sum() - 1.0).abs() > 1e-9 {
            return Err(ScanError::Validation(format!(
                "profile '{}' momentum timeframe weights sum to {}, expected 1",
                self.name,
                self.momentum_timeframes.sum()
            )));
        }
        Ok(())
    }

    /// Default profile for a regime
    pub fn for_regime(label: RegimeLabel) -> Self {
        match label {
            RegimeLabel::Trending => WeightProfile {
                name: "trending".into(),
                momentum: 0.50,
                technical: 0.20,
                volume: 0.15,
                quality: 0.10,
                catalyst: 0.05,
                momentum_timeframes: MomentumWeights {
                    h1: 0.20,
                    h4: 0.35,
                    h12: 0.30,
                    h24: 0.15,
                },
            },
            RegimeLabel::Choppy => WeightProfile {
                name: "choppy".into(),
                momentum: 0.35,
                technical: 0.25,
                volume: 0.15,
                quality: 0.15,
                catalyst: 0.10,
                momentum_timeframes: MomentumWeights {
                    h1: 0.15,
                    h4: 0.30,
                    h12: 0.30,
                    h24: 0.25,
                },
            },
            RegimeLabel::HighVol => WeightProfile {
                name: "high_vol".into(),
                momentum: 0.30,
                technical: 0.25,
                volume: 0.15,
                quality: 0.20,
                catalyst: 0.10,
                momentum_timeframes: MomentumWeights {
                    h1: 0.10,
                    h4: 0.25,
                    h12: 0.35,
                    h24: 0.30,
                },
            },
        }
    }
}

/// Universe-wide detector inputs for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeInputs {
    /// Annualized 7d realized volatility, averaged over the universe
    pub vol7d: f64,
    /// Fraction of symbols above their 20-bar moving average
    pub breadth_above_20ma: f64,
    /// Volatility of per-bar volatility over the same window
    pub vol_of_vol: f64,
}

/// Published regime state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeState {
    pub label: RegimeLabel,
    /// Distance from the nearest classification boundary, normalized to [0,1]
    pub confidence: f64,
    pub profile: WeightProfile,
    pub since: DateTime<Utc>,
    /// Set when the last tick failed and this state is stale
    pub degraded: bool,
}

/// A recorded regime transition, appended to the regime history artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub at: DateTime<Utc>,
    pub from: RegimeLabel,
    pub to: RegimeLabel,
    pub confidence: f64,
}

struct DetectorInner {
    state: RegimeState,
    /// Pending switch target and how many consecutive ticks agreed with it
    pending: Option<(RegimeLabel, u32)>,
}

/// Regime detector with two-tick hysteresis
pub struct RegimeDetector {
    cfg: RegimeConfig,
    inner: RwLock<DetectorInner>,
}

impl RegimeDetector {
    pub fn new(cfg: RegimeConfig) -> Self {
        let initial = RegimeState {
            label: RegimeLabel::Choppy,
            confidence: 0.0,
            profile: WeightProfile::for_regime(RegimeLabel::Choppy),
            since: Utc::now(),
            degraded: false,
        };
        Self {
            cfg,
            inner: RwLock::new(DetectorInner {
                state: initial,
                pending: None,
            }),
        }
    }

    /// Raw classification of one tick's inputs, with boundary-distance
    /// confidence
    pub fn classify(&self, inputs: &RegimeInputs) -> (RegimeLabel, f64) {
        let c = &self.cfg;
        if inputs.vol7d >= c.vol7d_high {
            // Deeper above the threshold = higher confidence
            let confidence = ((inputs.vol7d - c.vol7d_high) / c.vol7d_high).clamp(0.0, 1.0);
            return (RegimeLabel::HighVol, confidence);
        }
        if inputs.vol7d <= c.vol7d_low && inputs.breadth_above_20ma >= c.breadth_high {
            let vol_margin = (c.vol7d_low - inputs.vol7d) / c.vol7d_low;
            let breadth_margin =
                (inputs.breadth_above_20ma - c.breadth_high) / (1.0 - c.breadth_high).max(1e-9);
            let confidence = vol_margin.min(breadth_margin).clamp(0.0, 1.0);
            return (RegimeLabel::Trending, confidence);
        }
        // Choppy: distance to whichever boundary is nearer
        let to_high = (c.vol7d_high - inputs.vol7d) / c.vol7d_high;
        let to_trend = if inputs.vol7d > c.vol7d_low {
            (inputs.vol7d - c.vol7d_low) / c.vol7d_low
        } else {
            (c.breadth_high - inputs.breadth_above_20ma).max(0.0) / c.breadth_high
        };
        (RegimeLabel::Choppy, to_high.min(to_trend).clamp(0.0, 1.0))
    }

    /// Evaluate one regime tick
    ///
    /// Returns the transition if the hysteresis requirement was met.
    pub fn on_tick(&self, inputs: &RegimeInputs) -> Option<RegimeTransition> {
        let (label, confidence) = self.classify(inputs);
        let mut inner = self.inner.write();
        inner.state.degraded = false;

        if label == inner.state.label {
            inner.pending = None;
            inner.state.confidence = confidence;
            return None;
        }

        let agreed = match inner.pending {
            Some((pending_label, count)) if pending_label == label => count + 1,
            _ => 1,
        };

        if agreed >= self.cfg.confirm_ticks {
            let from = inner.state.label;
            let at = Utc::now();
            inner.state = RegimeState {
                label,
                confidence,
                profile: WeightProfile::for_regime(label),
                since: at,
                degraded: false,
            };
            inner.pending = None;
            tracing::info!(%from, to = %label, confidence, "regime transition");
            Some(RegimeTransition {
                at,
                from,
                to: label,
                confidence,
            })
        } else {
            inner.pending = Some((label, agreed));
            None
        }
    }

    /// Mark the last tick failed; the cached regime stays authoritative
    pub fn on_tick_failure(&self, err: &ScanError) {
        tracing::warn!(error = %err, "regime tick failed, keeping last known good state");
        self.inner.write().state.degraded = true;
    }

    /// Current regime; cached value is authoritative between ticks
    pub fn current(&self) -> RegimeState {
        self.inner.read().state.clone()
    }
}

/// Compute detector inputs from per-symbol 1h bar series
///
/// `series` holds the most recent bars per universe symbol (at least 21
/// bars each to evaluate the 20-bar MA; shorter series are skipped).
pub fn inputs_from_series(series: &[Vec<Kline>]) -> Result<RegimeInputs, ScanError> {
    let mut vols = Vec::new();
    let mut above = 0usize;
    let mut counted = 0usize;
    let mut bar_vols = Vec::new();

    for bars in series {
        if bars.len() < 21 {
            continue;
        }
        counted += 1;

        // Hourly close-to-close log returns over up to 7d of bars
        let window = &bars[bars.len().saturating_sub(168)..];
        let mut returns = Vec::with_capacity(window.len());
        for pair in window.windows(2) {
            if pair[0].close > 0.0 && pair[1].close > 0.0 {
                returns.push((pair[1].close / pair[0].close).ln());
            }
        }
        if returns.len() >= 2 {
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                / (returns.len() - 1) as f64;
            // Annualize hourly vol
            vols.push(var.sqrt() * (24.0 * 365.0f64).sqrt());
        }

        let last = bars.last().expect("nonempty");
        let ma20: f64 =
            bars[bars.len() - 21..bars.len() - 1].iter().map(|b| b.close).sum::<f64>() / 20.0;
        if last.close > ma20 {
            above += 1;
        }

        for bar in window {
            if bar.close > 0.0 {
                bar_vols.push((bar.high - bar.low) / bar.close);
            }
        }
    }

    if counted == 0 {
        return Err(ScanError::Validation(
            "no symbol has enough history for regime inputs".into(),
        ));
    }

    let vol7d = if vols.is_empty() {
        0.0
    } else {
        vols.iter().sum::<f64>() / vols.len() as f64
    };
    let vol_of_vol = if bar_vols.len() >= 2 {
        let mean = bar_vols.iter().sum::<f64>() / bar_vols.len() as f64;
        let var = bar_vols.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (bar_vols.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };

    Ok(RegimeInputs {
        vol7d,
        breadth_above_20ma: above as f64 / counted as f64,
        vol_of_vol,
    })
}
