//! Ordered Gram-Schmidt residualization with protected momentum
//!
//! Fixed order over the scan batch: momentum is never modified; technical
//! is orthogonalized against momentum; volume against momentum and the
//! technical residual; quality and social against everything before them.
//! Projections use cross-symbol inner products over centered (not scaled)
//! columns. A zero-variance basis column contributes a zero projection.
//! Batches below the configured minimum are passed through untouched and
//! flagged, so single-symbol explain flows still work.

use super::{FactorVector, ResidualVector};

/// Flag value recorded on scan records when the batch was too small
pub const RESIDUALIZATION_SKIPPED: &str = "RESIDUALIZATION_SKIPPED";

/// Result of residualizing one batch
#[derive(Debug, Clone)]
pub struct ResidualizeOutcome {
    pub vectors: Vec<ResidualVector>,
    /// True when the batch was below the minimum and factors passed through
    pub skipped: bool,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn centered(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    values.iter().map(|v| v - m).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Remove the projections of `column` onto each basis vector in order.
/// Basis vectors with (numerically) zero variance are skipped.
fn orthogonalize(column: &[f64], basis: &[Vec<f64>]) -> Vec<f64> {
    let mut resid = centered(column);
    for b in basis {
        let denom = dot(b, b);
        if denom <= f64::EPSILON * column.len() as f64 {
            continue;
        }
        let beta = dot(&resid, b) / denom;
        for (r, bv) in resid.iter_mut().zip(b) {
            *r -= beta * bv;
        }
    }
    resid
}

/// Residualize a batch of factor vectors
///
/// The batch must already be in deterministic (symbol-sorted) order; the
/// output preserves input order. `momentum_core` in the output is the
/// exact input value for every symbol.
pub fn residualize(batch: &[FactorVector], min_batch: usize) -> ResidualizeOutcome {
    if batch.len() < min_batch {
        let vectors = batch
            .iter()
            .map(|f| ResidualVector {
                symbol: f.symbol.clone(),
                momentum_core: f.momentum_core,
                technical_resid: f.technical,
                volume_resid: f.volume,
                quality_resid: f.quality,
                social_resid: f.social,
                catalyst: f.catalyst,
            })
            .collect();
        return ResidualizeOutcome {
            vectors,
            skipped: true,
        };
    }

    let momentum: Vec<f64> = batch.iter().map(|f| f.momentum_core).collect();
    let technical: Vec<f64> = batch.iter().map(|f| f.technical).collect();
    let volume: Vec<f64> = batch.iter().map(|f| f.volume).collect();
    let quality: Vec<f64> = batch.iter().map(|f| f.quality).collect();
    let social: Vec<f64> = batch.iter().map(|f| f.social).collect();

    // Basis accumulates centered momentum, then each successive residual
    let mut basis: Vec<Vec<f64>> = vec![centered(&momentum)];

    let technical_resid = orthogonalize(&technical, &basis);
    basis.push(technical_resid.clone());

    let volume_resid = orthogonalize(&volume, &basis);
    basis.push(volume_resid.clone());

    let quality_resid = orthogonalize(&quality, &basis);
    basis.push(quality_resid.clone());

    let social_resid = orthogonalize(&social, &basis);

    let vectors = batch
        .iter()
        .enumerate()
        .map(|(i, f)| ResidualVector {
            symbol: f.symbol.clone(),
            // Protected: bit-equal to the input
            momentum_core: f.momentum_core,
            technical_resid: technical_resid[i],
            volume_resid: volume_resid[i],
            quality_resid: quality_resid[i],
            social_resid: social_resid[i],
            catalyst: f.catalyst,
        })
        .collect();

    ResidualizeOutcome {
        vectors,
        skipped: false,
    }
}
