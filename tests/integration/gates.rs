//! Entry-gate scenarios end to end: evaluator output shape and the
//! decisions the scanner records

use chrono::{Duration, TimeZone, Utc};
use momentum_scanner::config::GateConfig;
use momentum_scanner::gates::{evaluate, GateAction, GateInputs, GateName};
use momentum_scanner::micro::{evaluate_venue, MicroProof};
use momentum_scanner::regime::RegimeLabel;
use momentum_scanner::types::{BookSnapshot, Kline, Level, VenueId};

fn book(spread_bps: f64, depth_bid_usd: f64, depth_ask_usd: f64) -> BookSnapshot {
    let mid = 100.0;
    let half = mid * spread_bps / 10_000.0 / 2.0;
    BookSnapshot {
        bids: vec![Level {
            price: mid - half,
            size: depth_bid_usd / mid,
        }],
        asks: vec![Level {
            price: mid + half,
            size: depth_ask_usd / mid,
        }],
        ts: 0,
    }
}

fn bars_with_vadr(count: usize, vadr: f64) -> Vec<Kline> {
    let volume = (vadr / 2.0).powi(2);
    (0..count)
        .map(|i| Kline {
            open_time: i as i64 * 3_600_000,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume,
        })
        .collect()
}

fn base_inputs(proof: &MicroProof) -> GateInputs<'_> {
    let signal = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
    GateInputs {
        final_score: 83.0,
        micro: proof,
        funding_z: Some(2.3),
        funding_venues: 3,
        newest_bar_age_bars: 1,
        momentum_24h_pct: 6.0,
        accel_4h_pct: 0.4,
        signal_time: signal,
        execution_time: signal + Duration::seconds(12),
        provider_p99_ms: Some(180),
        atr_proximity: Some(0.3),
        relax_count: 0,
        oi_residual: None,
        etf_tint: None,
    }
}

#[test]
fn test_entry_cleared_full_trace() {
    // Kraken: spread 42bps, depth $135k/$120k, vadr 1.95, tier1 ADV
    let proof = MicroProof::from_venues(vec![evaluate_venue(
        VenueId::Kraken,
        &book(42.0, 135_000.0, 120_000.0),
        &bars_with_vadr(24, 1.95),
        10_000_000.0,
    )]);
    let decision = evaluate(
        &GateConfig::default(),
        RegimeLabel::Trending,
        &base_inputs(&proof),
    );

    assert_eq!(decision.action, GateAction::EntryCleared);
    let names: Vec<GateName> = decision.reasons.iter().map(|r| r.name).collect();
    assert_eq!(
        names,
        vec![
            GateName::CompositeScore,
            GateName::Microstructure,
            GateName::FundingDivergence,
            GateName::Freshness,
            GateName::Fatigue,
            GateName::LateFill,
        ],
        "hard gates evaluated in order"
    );
    assert!(decision.reasons.iter().all(|r| r.passed));

    // Serialized action matches the record wire format
    let wire = serde_json::to_string(&decision.action).unwrap();
    assert_eq!(wire, "\"ENTRY_CLEARED\"");
}

#[test]
fn test_spread_block_on_single_venue() {
    // 65bps over the 50bps tier1 limit; depth and VADR fine; one venue only
    let proof = MicroProof::from_venues(vec![evaluate_venue(
        VenueId::Kraken,
        &book(65.0, 150_000.0, 150_000.0),
        &bars_with_vadr(24, 1.95),
        10_000_000.0,
    )]);
    let mut inputs = base_inputs(&proof);
    inputs.final_score = 78.5;
    let decision = evaluate(&GateConfig::default(), RegimeLabel::Trending, &inputs);

    assert_eq!(decision.action, GateAction::GateBlocked);
    let micro = decision
        .reasons
        .iter()
        .find(|r| r.name == GateName::Microstructure)
        .unwrap();
    assert!(!micro.passed);
    assert!(micro.message.contains("spread_too_wide"));
    // The proof bundle records the failing venue's numbers
    let venue_metrics = &micro.metrics["venues"][0];
    assert_eq!(venue_metrics["venue"], "kraken");
    assert!(venue_metrics["spread_bps"].as_f64().unwrap() > 60.0);
}

#[test]
fn test_vadr_frozen_short_circuit() {
    // 12 bars: VADR frozen fails microstructure; freshness and fatigue
    // never run
    let proof = MicroProof::from_venues(vec![evaluate_venue(
        VenueId::Kraken,
        &book(20.0, 200_000.0, 200_000.0),
        &bars_with_vadr(12, 2.4),
        10_000_000.0,
    )]);
    let decision = evaluate(
        &GateConfig::default(),
        RegimeLabel::Trending,
        &base_inputs(&proof),
    );

    assert_eq!(decision.action, GateAction::GateBlocked);
    assert_eq!(decision.reasons.len(), 2, "score then microstructure only");
    let micro = &decision.reasons[1];
    assert!(micro.message.contains("vadr_frozen"));
    assert_eq!(micro.metrics["venues"][0]["vadr_frozen"], true);
}

#[test]
fn test_gate_reason_wire_shape() {
    let proof = MicroProof::from_venues(vec![evaluate_venue(
        VenueId::Kraken,
        &book(42.0, 135_000.0, 120_000.0),
        &bars_with_vadr(24, 1.95),
        10_000_000.0,
    )]);
    let decision = evaluate(
        &GateConfig::default(),
        RegimeLabel::Trending,
        &base_inputs(&proof),
    );

    let json = serde_json::to_value(&decision.reasons).unwrap();
    for reason in json.as_array().unwrap() {
        assert!(reason["name"].is_string());
        assert!(reason["passed"].is_boolean());
        assert!(reason["metrics"].is_object());
        assert!(reason["message"].is_string());
    }
    // Names serialize snake_case
    assert_eq!(json[0]["name"], "composite_score");
    assert_eq!(json[1]["name"], "microstructure");
}
