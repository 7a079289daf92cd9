//! Composite scorer
//!
//! Residual factors are rank-normalized over the batch into [0,100], then
//! combined with the active regime's weight profile into a base score.
//! Social is additive only: its contribution is capped and never enters
//! the weighted sum. Per-factor contributions are emitted so downstream
//! explanations can attribute points.

use crate::factors::ResidualVector;
use crate::regime::WeightProfile;
use crate::types::Symbol;
use serde::{Deserialize, Serialize};

/// Raw points a default social plug-in can produce before the cap;
/// the cap itself is the normative part.
const SOCIAL_RAW_SCALE: f64 = 15.0;

/// One factor's share of a composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor: String,
    pub weight: f64,
    /// Rank-normalized value in [0,100]
    pub normalized: f64,
    /// `weight * normalized`
    pub points: f64,
}

/// Composite score for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: Symbol,
    /// Weighted sum in [0,100]
    pub base: f64,
    /// Capped social add-on in [0,10]
    pub social_add: f64,
    /// `base + social_add`, optionally clamped at 100 by policy
    pub final_score: f64,
    pub contributions: Vec<FactorContribution>,
}

/// Rank-normalize a column into [0,100] with ties averaged
///
/// Robust to outliers by construction: only order matters. A single-entry
/// column normalizes to the midpoint.
pub fn rank_normalize(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![50.0];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Average rank across the tie run
        let avg_rank = (i + j) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    ranks
        .iter()
        .map(|r| (r + 0.5) / n as f64 * 100.0)
        .collect()
}

/// Score a residualized batch with the active profile
///
/// Weighted factors are momentum, technical, volume, quality, catalyst;
/// `social_add = min(contribution, cap)`. Scoring the same batch twice
/// yields identical output.
pub fn score_batch(
    batch: &[ResidualVector],
    profile: &WeightProfile,
    social_cap: f64,
    cap_final_at_100: bool,
) -> Vec<CompositeScore> {
    if batch.is_empty() {
        return Vec::new();
    }

    let momentum_n = rank_normalize(&batch.iter().map(|r| r.momentum_core).collect::<Vec<_>>());
    let technical_n = rank_normalize(&batch.iter().map(|r| r.technical_resid).collect::<Vec<_>>());
    let volume_n = rank_normalize(&batch.iter().map(|r| r.volume_resid).collect::<Vec<_>>());
    let quality_n = rank_normalize(&batch.iter().map(|r| r.quality_resid).collect::<Vec<_>>());
    let catalyst_n = rank_normalize(&batch.iter().map(|r| r.catalyst).collect::<Vec<_>>());
    let social_n = rank_normalize(&batch.iter().map(|r| r.social_resid).collect::<Vec<_>>());

    batch
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let contributions = vec![
                FactorContribution {
                    factor: "momentum_core".into(),
                    weight: profile.momentum,
                    normalized: momentum_n[i],
                    points: profile.momentum * momentum_n[i],
                },
                FactorContribution {
                    factor: "technical_resid".into(),
                    weight: profile.technical,
                    normalized: technical_n[i],
                    points: profile.technical * technical_n[i],
                },
                FactorContribution {
                    factor: "volume_resid".into(),
                    weight: profile.volume,
                    normalized: volume_n[i],
                    points: profile.volume * volume_n[i],
                },
                FactorContribution {
                    factor: "quality_resid".into(),
                    weight: profile.quality,
                    normalized: quality_n[i],
                    points: profile.quality * quality_n[i],
                },
                FactorContribution {
                    factor: "catalyst".into(),
                    weight: profile.catalyst,
                    normalized: catalyst_n[i],
                    points: profile.catalyst * catalyst_n[i],
                },
            ];

            let base: f64 = contributions.iter().map(|c| c.points).sum::<f64>().clamp(0.0, 100.0);

            // Default plug-in: rank percentile scaled to raw points, then
            // the normative cap
            let social_contribution = social_n[i] / 100.0 * SOCIAL_RAW_SCALE;
            let social_add = social_contribution.min(social_cap).max(0.0);

            let final_score = if cap_final_at_100 {
                (base + social_add).min(100.0)
            } else {
                base + social_add
            };

            CompositeScore {
                symbol: r.symbol.clone(),
                base,
                social_add,
                final_score,
                contributions,
            }
        })
        .collect()
}
