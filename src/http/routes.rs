//! Read-only query endpoints
//!
//! - GET /api/v1/candidates - latest scan's ranked list with gate status
//! - GET /api/v1/explain/{symbol} - factor/gate/provenance trace
//! - GET /api/v1/regime - current regime, confidence, weight profile
//! - GET /api/v1/health - breaker/budget status, cache ratios, latencies
//!
//! Everything here reads state produced by the scanner; nothing mutates.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;

use crate::error::ScanError;
use crate::http::AppState;
use crate::metrics;
use crate::types::Symbol;

/// Slim candidate view for the ranked list
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateSummary {
    rank: u32,
    symbol: Symbol,
    final_score: f64,
    base: f64,
    social_add: f64,
    action: Option<crate::gates::GateAction>,
    gates_passed: Option<bool>,
}

/// GET /api/v1/candidates
pub async fn get_candidates(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ScanError> {
    tracing::debug!("GET /api/v1/candidates");
    let Some(scan) = state.store.latest() else {
        return Err(ScanError::Validation(
            "no scan has completed yet".to_string(),
        ));
    };

    let candidates: Vec<CandidateSummary> = scan
        .records
        .iter()
        .map(|r| CandidateSummary {
            rank: r.rank,
            symbol: r.symbol.clone(),
            final_score: r.score.final_score,
            base: r.score.base,
            social_add: r.score.social_add,
            action: r.action,
            gates_passed: if r.gates.is_empty() {
                None
            } else {
                Some(r.gates.iter().all(|g| g.passed))
            },
        })
        .collect();

    Ok(Json(json!({
        "scanId": scan.scan_id,
        "finishedAt": scan.finished_at,
        "regime": scan.regime.label,
        "universeHash": scan.universe_hash,
        "partial": scan.partial,
        "candidates": candidates,
        "errors": scan.errors,
    })))
}

/// GET /api/v1/explain/{symbol}
pub async fn get_explain(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, ScanError> {
    tracing::debug!(%symbol, "GET /api/v1/explain");
    let symbol = Symbol::from_str(&symbol).map_err(ScanError::Validation)?;

    let Some(record) = state.store.explain(&symbol) else {
        return Err(ScanError::InsufficientHistory {
            symbol: symbol.to_string(),
            venue: "any".into(),
            bars: 0,
            required: 1,
        });
    };

    Ok(Json(serde_json::to_value(&record)?))
}

/// GET /api/v1/regime
pub async fn get_regime(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ScanError> {
    tracing::debug!("GET /api/v1/regime");
    let regime = state.regime.current();
    Ok(Json(serde_json::to_value(&regime)?))
}

/// GET /api/v1/health
pub async fn get_health(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ScanError> {
    tracing::debug!("GET /api/v1/health");

    let mut venues = Vec::new();
    for venue in state.facade.venues() {
        match state.facade.venue_health(venue) {
            Ok(health) => venues.push(serde_json::to_value(&health)?),
            Err(err) => venues.push(json!({
                "venue": venue,
                "error": err.kind(),
            })),
        }
    }

    let snapshot = metrics::registry().snapshot();
    Ok(Json(json!({
        "venues": venues,
        "cache": snapshot.cache,
        "scans": {
            "total": snapshot.scans_total,
            "latency": snapshot.scan_latency,
        },
        "latestScan": state.store.latest().map(|s| json!({
            "scanId": s.scan_id,
            "finishedAt": s.finished_at,
            "partial": s.partial,
        })),
    })))
}
