//! Cache behavior through the facade: single-flight and reuse

use crate::common::{rig_with, FakeVenue, UNIVERSE_12};
use momentum_scanner::types::{Interval, Symbol, VenueId};
use momentum_scanner::venues::{VenueAdapter, VenueRegistry};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_misses_issue_one_upstream_fetch() {
    // Ten concurrent scans requesting the same klines with an empty cache
    let kraken = Arc::new(FakeVenue::new(VenueId::Kraken));
    let mut adapters: VenueRegistry = HashMap::new();
    adapters.insert(VenueId::Kraken, Arc::clone(&kraken) as Arc<dyn VenueAdapter>);
    for venue in [VenueId::Binance, VenueId::Coinbase] {
        adapters.insert(venue, Arc::new(FakeVenue::new(venue)) as Arc<dyn VenueAdapter>);
    }
    let rig = rig_with(UNIVERSE_12, adapters, |_| {});

    let symbol = Symbol::from_str("BTC/USD").unwrap();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let facade = Arc::clone(&rig.facade);
        let symbol = symbol.clone();
        handles.push(tokio::spawn(async move {
            facade
                .klines(VenueId::Kraken, &symbol, Interval::H1, 100)
                .await
        }));
    }

    let mut checksums = Vec::new();
    for handle in handles {
        let envelope = handle.await.unwrap().expect("read succeeds");
        checksums.push(envelope.checksum);
    }

    assert_eq!(
        kraken.klines_calls.load(Ordering::SeqCst),
        1,
        "exactly one upstream fetch for ten concurrent callers"
    );
    checksums.sort();
    checksums.dedup();
    assert_eq!(checksums.len(), 1, "every caller got the identical envelope");
}

#[tokio::test]
async fn test_scan_reuses_cached_reads() {
    let kraken = Arc::new(FakeVenue::new(VenueId::Kraken));
    let mut adapters: VenueRegistry = HashMap::new();
    adapters.insert(VenueId::Kraken, Arc::clone(&kraken) as Arc<dyn VenueAdapter>);
    for venue in [VenueId::Binance, VenueId::Coinbase] {
        adapters.insert(venue, Arc::new(FakeVenue::new(venue)) as Arc<dyn VenueAdapter>);
    }
    let rig = rig_with(UNIVERSE_12, adapters, |_| {});

    rig.orchestrator
        .run(tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    let after_first = kraken.klines_calls.load(Ordering::SeqCst);

    rig.orchestrator
        .run(tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    let after_second = kraken.klines_calls.load(Ordering::SeqCst);

    assert_eq!(
        after_first, after_second,
        "second scan inside the TTL window is served from cache"
    );
}
