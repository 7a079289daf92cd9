//! Entry-gate evaluator
//!
//! Hard admission checks in a fixed order; the first failure short-circuits
//! the rest. Every evaluated gate emits a structured reason with metrics, a
//! message, and an optional hint. `evaluate` is a pure function of its
//! inputs so the scanner, the explain flow, and replay harnesses can all
//! call it and agree.

use crate::config::{FewVenuesPolicy, GateConfig};
use crate::micro::MicroProof;
use crate::regime::RegimeLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Gate identifiers, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateName {
    CompositeScore,
    Microstructure,
    FundingDivergence,
    Freshness,
    Fatigue,
    LateFill,
    OiResidual,
    EtfTint,
}

impl GateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateName::CompositeScore => "composite_score",
            GateName::Microstructure => "microstructure",
            GateName::FundingDivergence => "funding_divergence",
            GateName::Freshness => "freshness",
            GateName::Fatigue => "fatigue",
            GateName::LateFill => "late_fill",
            GateName::OiResidual => "oi_residual",
            GateName::EtfTint => "etf_tint",
        }
    }
}

/// Structured outcome of one gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReason {
    pub name: GateName,
    pub passed: bool,
    pub metrics: serde_json::Value,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Final admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateAction {
    EntryCleared,
    GateBlocked,
}

/// Decision plus the trace of evaluated gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    pub passed: bool,
    pub reasons: Vec<GateReason>,
}

/// Everything the evaluator needs; gathered by the orchestrator
#[derive(Debug, Clone)]
pub struct GateInputs<'a> {
    pub final_score: f64,
    pub micro: &'a MicroProof,
    /// Cross-venue funding divergence in sigmas, when computable
    pub funding_z: Option<f64>,
    /// Venues that reported funding
    pub funding_venues: usize,
    /// Age of the newest bar, in bars
    pub newest_bar_age_bars: u32,
    pub momentum_24h_pct: f64,
    pub accel_4h_pct: f64,
    pub signal_time: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    /// Provider p99 latency, for the late-fill grace window
    pub provider_p99_ms: Option<u64>,
    /// Distance from the trigger price in ATR units
    pub atr_proximity: Option<f64>,
    /// Late-fill relaxations already granted to this symbol in the window
    pub relax_count: u32,
    /// Optional additive signals; warn-only
    pub oi_residual: Option<f64>,
    pub etf_tint: Option<f64>,
}

/// Evaluate the gates in order, short-circuiting on the first failure
pub fn evaluate(cfg: &GateConfig, regime: RegimeLabel, inputs: &GateInputs) -> GateDecision {
    let mut reasons = Vec::new();

    // 1. Composite floor
    let score_ok = inputs.final_score >= cfg.min_final_score;
    reasons.push(GateReason {
        name: GateName::CompositeScore,
        passed: score_ok,
        metrics: json!({ "final_score": inputs.final_score, "min": cfg.min_final_score }),
        message: if score_ok {
            format!("score {:.1} >= {:.1}", inputs.final_score, cfg.min_final_score)
        } else {
            format!("score {:.1} below {:.1}", inputs.final_score, cfg.min_final_score)
        },
        hint: (!score_ok).then(|| "wait for a stronger composite".to_string()),
    });
    if !score_ok {
        return blocked(reasons);
    }

    // 2. Microstructure on at least one venue
    let micro_ok = inputs.micro.eligible;
    let venue_reasons: Vec<serde_json::Value> = inputs
        .micro
        .venues
        .iter()
        .map(|v| {
            json!({
                "venue": v.venue,
                "eligible": v.eligible,
                "spread_bps": v.spread_bps,
                "depth_bid_usd": v.depth_bid_usd,
                "depth_ask_usd": v.depth_ask_usd,
                "vadr": v.vadr,
                "vadr_frozen": v.vadr_frozen,
                "reasons": v.failure_reasons(),
            })
        })
        .collect();
    reasons.push(GateReason {
        name: GateName::Microstructure,
        passed: micro_ok,
        metrics: json!({ "venues": venue_reasons }),
        message: match inputs.micro.eligible_venue() {
            Some(venue) => format!("eligible on {}", venue),
            None => {
                let mut all: Vec<&str> = inputs
                    .micro
                    .venues
                    .iter()
                    .flat_map(|v| v.failure_reasons())
                    .collect();
                all.dedup();
                format!("no eligible venue ({})", all.join(", "))
            }
        },
        hint: (!micro_ok).then(|| "spread/depth/VADR below tier minima on every venue".to_string()),
    });
    if !micro_ok {
        return blocked(reasons);
    }

    // 3. Funding divergence; defers (or is skipped) below the venue quorum
    if inputs.funding_venues < cfg.funding_min_venues {
        match cfg.few_venues_policy {
            FewVenuesPolicy::Defer => {
                reasons.push(GateReason {
                    name: GateName::FundingDivergence,
                    passed: true,
                    metrics: json!({
                        "venues": inputs.funding_venues,
                        "required": cfg.funding_min_venues,
                    }),
                    message: format!(
                        "deferred: {} of {} venues reporting",
                        inputs.funding_venues, cfg.funding_min_venues
                    ),
                    hint: None,
                });
            }
            FewVenuesPolicy::Skip => {}
        }
    } else {
        let z = inputs.funding_z.unwrap_or(0.0);
        let funding_ok = z >= cfg.funding_z_min;
        reasons.push(GateReason {
            name: GateName::FundingDivergence,
            passed: funding_ok,
            metrics: json!({ "z_score": z, "min": cfg.funding_z_min, "venues": inputs.funding_venues }),
            message: format!("funding z {:.2} vs {:.1} minimum", z, cfg.funding_z_min),
            hint: (!funding_ok).then(|| "no cross-venue positioning divergence".to_string()),
        });
        if !funding_ok {
            return blocked(reasons);
        }
    }

    // 4. Freshness; tighter under high volatility
    let max_age = if regime == RegimeLabel::HighVol {
        cfg.max_bars_age_high_vol
    } else {
        cfg.max_bars_age
    };
    let fresh_ok = inputs.newest_bar_age_bars <= max_age;
    reasons.push(GateReason {
        name: GateName::Freshness,
        passed: fresh_ok,
        metrics: json!({ "bar_age": inputs.newest_bar_age_bars, "max": max_age, "regime": regime }),
        message: format!("newest bar {} bars old (max {})", inputs.newest_bar_age_bars, max_age),
        hint: (!fresh_ok).then(|| "signal computed from stale bars".to_string()),
    });
    if !fresh_ok {
        return blocked(reasons);
    }

    // 5. Fatigue; acceleration can override
    let fatigued = inputs.momentum_24h_pct > cfg.fatigue_threshold_pct
        && inputs.accel_4h_pct <= cfg.accel_override_pct;
    reasons.push(GateReason {
        name: GateName::Fatigue,
        passed: !fatigued,
        metrics: json!({
            "momentum_24h_pct": inputs.momentum_24h_pct,
            "threshold_pct": cfg.fatigue_threshold_pct,
            "accel_4h_pct": inputs.accel_4h_pct,
            "accel_override_pct": cfg.accel_override_pct,
        }),
        message: if fatigued {
            format!(
                "24h move {:.1}% exceeds {:.1}% without acceleration",
                inputs.momentum_24h_pct, cfg.fatigue_threshold_pct
            )
        } else {
            format!("24h move {:.1}% within fatigue limits", inputs.momentum_24h_pct)
        },
        hint: fatigued.then(|| "late entry risk; wait for a reset or fresh acceleration".to_string()),
    });
    if fatigued {
        return blocked(reasons);
    }

    // 6. Late fill; bounded grace only under safety conditions
    let delay = (inputs.execution_time - inputs.signal_time)
        .to_std()
        .unwrap_or_default();
    let mut late_ok = delay <= cfg.max_fill_delay;
    let mut grace_applied = false;
    if !late_ok {
        let slow_provider = inputs
            .provider_p99_ms
            .map(|p99| p99 > cfg.p99_baseline_ms)
            .unwrap_or(false);
        let near_trigger = inputs
            .atr_proximity
            .map(|d| d <= cfg.atr_proximity_max)
            .unwrap_or(false);
        let relax_available = inputs.relax_count < cfg.relax_per_window;
        if slow_provider
            && near_trigger
            && relax_available
            && delay <= cfg.max_fill_delay + cfg.grace_window
        {
            late_ok = true;
            grace_applied = true;
        }
    }
    reasons.push(GateReason {
        name: GateName::LateFill,
        passed: late_ok,
        metrics: json!({
            "delay_secs": delay.as_secs_f64(),
            "max_secs": cfg.max_fill_delay.as_secs_f64(),
            "grace_applied": grace_applied,
            "relax_count": inputs.relax_count,
        }),
        message: if grace_applied {
            format!("delay {:.1}s admitted under p99 grace window", delay.as_secs_f64())
        } else {
            format!(
                "signal to execution {:.1}s (max {:.0}s)",
                delay.as_secs_f64(),
                cfg.max_fill_delay.as_secs_f64()
            )
        },
        hint: (!late_ok).then(|| "fill would chase a stale signal".to_string()),
    });
    if !late_ok {
        return blocked(reasons);
    }

    // 7. Additives: warn-only, never block
    if let Some(oi) = inputs.oi_residual {
        reasons.push(GateReason {
            name: GateName::OiResidual,
            passed: true,
            metrics: json!({ "oi_residual": oi }),
            message: format!("open-interest residual {:.2} (advisory)", oi),
            hint: (oi.abs() > 2.0).then(|| "crowded positioning".to_string()),
        });
    }
    if let Some(tint) = inputs.etf_tint {
        reasons.push(GateReason {
            name: GateName::EtfTint,
            passed: true,
            metrics: json!({ "etf_tint": tint }),
            message: format!("ETF flow tint {:.2} (advisory)", tint),
            hint: None,
        });
    }

    GateDecision {
        action: GateAction::EntryCleared,
        passed: true,
        reasons,
    }
}

fn blocked(reasons: Vec<GateReason>) -> GateDecision {
    GateDecision {
        action: GateAction::GateBlocked,
        passed: false,
        reasons,
    }
}

/// Cross-venue funding z-score: divergence of the widest venue from the
/// mean, in population sigmas. Defined only with at least `min_venues`
/// reporting.
pub fn funding_z_score(rates: &[f64], min_venues: usize) -> Option<f64> {
    if rates.len() < min_venues || rates.len() < 2 {
        return None;
    }
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    let var = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rates.len() as f64;
    let std = var.sqrt();
    if std <= 0.0 {
        return Some(0.0);
    }
    rates
        .iter()
        .map(|r| (r - mean).abs() / std)
        .fold(None, |acc: Option<f64>, z| {
            Some(acc.map_or(z, |a| a.max(z)))
        })
}
