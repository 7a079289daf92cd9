//! End-to-end scan runs over in-memory venues

use crate::common::{
    bar_series, default_rig, healthy_adapters, rig_with, FakeVenue, UNIVERSE_12,
};
use momentum_scanner::progress::{BusMessage, Status};
use momentum_scanner::types::{Symbol, VenueId};
use momentum_scanner::venues::{VenueAdapter, VenueRegistry};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_full_scan_produces_ranked_permutation() {
    let rig = default_rig();
    let result = rig
        .orchestrator
        .run(CancellationToken::new())
        .await
        .expect("scan succeeds");

    assert_eq!(result.records.len(), 12);
    assert!(!result.partial);

    // Ranks are a permutation of 1..N, each symbol appears once
    let ranks: HashSet<u32> = result.records.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, (1..=12).collect::<HashSet<u32>>());
    let symbols: HashSet<&str> = result.records.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols.len(), 12);

    // Candidates are a subset of the universe
    for record in &result.records {
        assert!(UNIVERSE_12.contains(record.symbol.as_str()));
    }

    // Ranked by final score, descending
    for pair in result.records.windows(2) {
        assert!(pair[0].score.final_score >= pair[1].score.final_score);
    }

    // Large batch: residualization ran
    assert!(result.records.iter().all(|r| r.flags.is_empty()));

    // Every record carries provenance
    assert!(result.records.iter().all(|r| !r.envelopes.is_empty()));
}

#[tokio::test]
async fn test_momentum_protected_through_pipeline() {
    let rig = default_rig();
    let result = rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    for record in &result.records {
        assert_eq!(
            record.factors.raw.momentum_core.to_bits(),
            record.factors.resid.momentum_core.to_bits(),
            "momentum must pass through residualization untouched for {}",
            record.symbol
        );
    }
}

#[tokio::test]
async fn test_scan_is_idempotent_on_cached_data() {
    let rig = default_rig();
    let first = rig.orchestrator.run(CancellationToken::new()).await.unwrap();
    let second = rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    for (a, b) in first.records.iter().zip(&second.records) {
        assert_eq!(a.symbol, b.symbol);
        assert_eq!(a.rank, b.rank);
        assert_eq!(a.score.final_score, b.score.final_score);
        assert_eq!(
            a.factors.resid.technical_resid,
            b.factors.resid.technical_resid
        );
    }
}

#[tokio::test]
async fn test_small_batch_flagged_and_still_ranked() {
    let rig = rig_with("BTC/USD 1000\nETH/USD 1000\nSOL/USD 1000\n", healthy_adapters(), |_| {});
    let result = rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.records.len(), 3);
    for record in &result.records {
        assert!(
            record
                .flags
                .iter()
                .any(|f| f == "RESIDUALIZATION_SKIPPED"),
            "small batch must be flagged"
        );
    }
    let ranks: Vec<u32> = result.records.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_symbol_recorded_not_fatal() {
    let victim = Symbol::from_str("BTC/USD").unwrap();
    let mut adapters: VenueRegistry = HashMap::new();
    for venue in VenueId::ALL {
        let mut fake = FakeVenue::new(venue);
        // Fails on the primary and on its fallback
        if venue != VenueId::Coinbase {
            fake.failing = vec![victim.clone()];
        }
        adapters.insert(venue, Arc::new(fake) as Arc<dyn VenueAdapter>);
    }

    let rig = rig_with(UNIVERSE_12, adapters, |_| {});
    let result = rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    assert!(result.partial);
    assert_eq!(result.records.len(), 11, "other symbols keep ranking");
    assert!(result.records.iter().all(|r| r.symbol != victim));
    let error = result
        .errors
        .iter()
        .find(|e| e.symbol == victim)
        .expect("victim recorded");
    assert_eq!(error.kind, "TRANSIENT_IO");
}

#[tokio::test]
async fn test_insufficient_history_excludes_symbol() {
    let victim = Symbol::from_str("DOGE/USD").unwrap();
    let mut adapters: VenueRegistry = HashMap::new();
    for venue in VenueId::ALL {
        let mut fake = FakeVenue::new(venue);
        fake.bars.insert(victim.clone(), bar_series(12, 3));
        adapters.insert(venue, Arc::new(fake) as Arc<dyn VenueAdapter>);
    }

    let rig = rig_with(UNIVERSE_12, adapters, |_| {});
    let result = rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    let error = result
        .errors
        .iter()
        .find(|e| e.symbol == victim)
        .expect("short-history symbol recorded");
    assert_eq!(error.kind, "INSUFFICIENT_HISTORY");
}

#[tokio::test]
async fn test_cancellation_aborts() {
    let rig = default_rig();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = rig.orchestrator.run(cancel).await.unwrap_err();
    assert_eq!(err.kind(), "ABORTED");
}

#[tokio::test]
async fn test_progress_events_ordered_and_emitted() {
    let rig = default_rig();
    let mut reader = rig.bus.subscribe();
    rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    let mut events = Vec::new();
    while let Some(message) = reader.try_recv() {
        match message {
            BusMessage::Event(event) => events.push(event),
            BusMessage::Dropped(n) => panic!("reader lagged by {}", n),
        }
    }

    assert!(!events.is_empty());
    for pair in events.windows(2) {
        assert!(
            pair[1].seq > pair[0].seq,
            "sequence numbers strictly increase"
        );
    }

    let last = events.last().unwrap();
    assert_eq!(last.status, Status::Ok, "final event is the emit OK");
    assert!(last.metrics.is_some());
}

#[tokio::test]
async fn test_records_persisted_as_jsonl() {
    let rig = default_rig();
    let result = rig.orchestrator.run(CancellationToken::new()).await.unwrap();

    let path = rig
        .cfg
        .data_dir
        .join("scans")
        .join(format!("{}.jsonl", result.scan_id));
    let raw = std::fs::read_to_string(path).expect("scan file written");
    assert_eq!(raw.lines().count(), 12);
    assert!(raw.contains("\"scanId\""));
    assert!(raw.contains("\"envelopes\""));
}
