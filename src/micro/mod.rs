//! Microstructure evaluator
//!
//! Computes spread, two-sided depth, and VADR from exchange-native L1/L2
//! plus recent bars, selects tier minima by average daily volume, and
//! records a per-venue decision. Overall eligibility requires passing on
//! at least one venue; the proof bundle keeps every venue's metrics and
//! reasons so a blocked symbol can be explained.

use crate::types::{BookSnapshot, Kline, VenueId};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

/// Depth band around mid for the ±2% notional sums
pub const DEPTH_BAND_PCT: f64 = 0.02;
/// Bars in the VADR distribution window (24h of 1h bars)
pub const VADR_WINDOW: usize = 24;
/// Bars averaged into the current VADR metric
pub const VADR_RECENT: usize = 6;
/// Bars required before VADR unfreezes
pub const VADR_MIN_BARS: usize = 20;

/// Liquidity tier minima selected by ADV
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiquidityTier {
    pub name: &'static str,
    pub min_adv_usd: f64,
    pub max_spread_bps: f64,
    pub min_depth_usd: f64,
    pub min_vadr: f64,
}

/// Tier table, highest ADV first
pub const TIERS: [LiquidityTier; 3] = [
    LiquidityTier {
        name: "tier1",
        min_adv_usd: 5_000_000.0,
        max_spread_bps: 50.0,
        min_depth_usd: 100_000.0,
        min_vadr: 1.75,
    },
    LiquidityTier {
        name: "tier2",
        min_adv_usd: 1_000_000.0,
        max_spread_bps: 80.0,
        min_depth_usd: 50_000.0,
        min_vadr: 1.85,
    },
    LiquidityTier {
        name: "tier3",
        min_adv_usd: 0.0,
        max_spread_bps: 120.0,
        min_depth_usd: 25_000.0,
        min_vadr: 2.00,
    },
];

/// Select the tier whose ADV floor the symbol clears
pub fn tier_for_adv(adv_usd: f64) -> &'static LiquidityTier {
    TIERS
        .iter()
        .find(|t| adv_usd >= t.min_adv_usd)
        .unwrap_or(&TIERS[TIERS.len() - 1])
}

/// One threshold check inside a venue decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroCheck {
    pub name: String,
    pub passed: bool,
    pub value: f64,
    pub limit: f64,
    /// Stable reason code when failed, e.g. `spread_too_wide`
    pub reason: Option<String>,
}

/// Per-venue microstructure decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueMicro {
    pub venue: VenueId,
    pub spread_bps: f64,
    pub depth_bid_usd: f64,
    pub depth_ask_usd: f64,
    /// Mean per-bar VADR over the recent window
    pub vadr: f64,
    /// True when fewer than 20 bars backed the metric
    pub vadr_frozen: bool,
    /// Gate-effective threshold: `max(p80(24h VADR), tier minimum)`
    pub vadr_threshold: f64,
    pub tier: String,
    pub eligible: bool,
    pub checks: Vec<MicroCheck>,
}

impl VenueMicro {
    /// Reason codes of the failed checks
    pub fn failure_reasons(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter_map(|c| c.reason.as_deref())
            .collect()
    }
}

/// Proof bundle across all evaluated venues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroProof {
    pub venues: Vec<VenueMicro>,
    /// Passing on at least one venue
    pub eligible: bool,
}

impl MicroProof {
    pub fn from_venues(venues: Vec<VenueMicro>) -> Self {
        let eligible = venues.iter().any(|v| v.eligible);
        Self { venues, eligible }
    }

    /// The first venue that passed every check, if any
    pub fn eligible_venue(&self) -> Option<VenueId> {
        self.venues.iter().find(|v| v.eligible).map(|v| v.venue)
    }
}

/// Per-bar VADR terms over the trailing distribution window
pub fn vadr_series(bars: &[Kline]) -> Vec<f64> {
    let start = bars.len().saturating_sub(VADR_WINDOW);
    bars[start..].iter().map(|b| b.vadr_term()).collect()
}

/// Evaluate one venue's microstructure for a symbol
///
/// `bars` is the symbol's recent 1h series on this venue; `adv_usd`
/// selects the tier. With fewer than 20 bars the VADR metric is frozen
/// and the venue cannot pass.
pub fn evaluate_venue(
    venue: VenueId,
    book: &BookSnapshot,
    bars: &[Kline],
    adv_usd: f64,
) -> VenueMicro {
    let tier = tier_for_adv(adv_usd);

    let spread_bps = book.spread_bps().unwrap_or(f64::INFINITY);
    let depth_bid_usd = book.depth_bid_usd(DEPTH_BAND_PCT);
    let depth_ask_usd = book.depth_ask_usd(DEPTH_BAND_PCT);

    let series = vadr_series(bars);
    let vadr_frozen = bars.len() < VADR_MIN_BARS;
    let recent_start = series.len().saturating_sub(VADR_RECENT);
    let recent = &series[recent_start..];
    let vadr = if recent.is_empty() {
        0.0
    } else {
        recent.iter().sum::<f64>() / recent.len() as f64
    };

    let p80 = if series.len() >= VADR_MIN_BARS {
        let mut data = Data::new(series.clone());
        data.percentile(80)
    } else {
        0.0
    };
    let vadr_threshold = p80.max(tier.min_vadr);

    let spread_check = MicroCheck {
        name: "spread".into(),
        passed: spread_bps <= tier.max_spread_bps,
        value: spread_bps,
        limit: tier.max_spread_bps,
        reason: (spread_bps > tier.max_spread_bps).then(|| "spread_too_wide".into()),
    };

    let depth_value = depth_bid_usd.min(depth_ask_usd);
    let depth_check = MicroCheck {
        name: "depth".into(),
        passed: depth_value >= tier.min_depth_usd,
        value: depth_value,
        limit: tier.min_depth_usd,
        reason: (depth_value < tier.min_depth_usd).then(|| "depth_too_thin".into()),
    };

    let vadr_check = if vadr_frozen {
        MicroCheck {
            name: "vadr".into(),
            passed: false,
            value: vadr,
            limit: vadr_threshold,
            reason: Some("vadr_frozen".into()),
        }
    } else {
        MicroCheck {
            name: "vadr".into(),
            passed: vadr >= vadr_threshold,
            value: vadr,
            limit: vadr_threshold,
            reason: (vadr < vadr_threshold).then(|| "vadr_too_low".into()),
        }
    };

    let checks = vec![spread_check, depth_check, vadr_check];
    let eligible = checks.iter().all(|c| c.passed);

    VenueMicro {
        venue,
        spread_bps,
        depth_bid_usd,
        depth_ask_usd,
        vadr,
        vadr_frozen,
        vadr_threshold,
        tier: tier.name.to_string(),
        eligible,
        checks,
    }
}
