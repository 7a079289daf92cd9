//! Shared fixtures for integration tests
//!
//! A programmable in-memory venue adapter plus a builder that wires a full
//! scanner stack (facade, cache, limiters, regime, store, bus) against
//! temp-dir storage and a synthetic universe.

use async_trait::async_trait;
use momentum_scanner::cache::TieredCache;
use momentum_scanner::config::ScannerConfig;
use momentum_scanner::error::ScanError;
use momentum_scanner::facade::DataFacade;
use momentum_scanner::factors::NullSocial;
use momentum_scanner::limiter::LimiterRegistry;
use momentum_scanner::pipeline::Orchestrator;
use momentum_scanner::progress::ProgressBus;
use momentum_scanner::regime::RegimeDetector;
use momentum_scanner::store::ScanStore;
use momentum_scanner::types::{
    BookSnapshot, Interval, Kline, Level, Symbol, Trade, VenueId,
};
use momentum_scanner::venues::{VenueAdapter, VenueRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic 1h bar series with a gentle uptrend and volume pulse
pub fn bar_series(count: usize, seed: u64) -> Vec<Kline> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let start = now_ms - count as i64 * 3_600_000;
    (0..count)
        .map(|i| {
            let phase = (i as f64 + seed as f64) * 0.37;
            let close = 100.0 + seed as f64 + (i as f64 * 0.05) + phase.sin();
            Kline {
                open_time: start + i as i64 * 3_600_000,
                open: close - 0.2,
                high: close + 1.2,
                low: close - 1.4,
                close,
                volume: 900.0 + 200.0 * (phase.cos() + 1.0),
            }
        })
        .collect()
}

/// A liquid two-sided book around 100
pub fn deep_book() -> BookSnapshot {
    BookSnapshot {
        bids: vec![
            Level { price: 99.9, size: 1500.0 },
            Level { price: 99.5, size: 2500.0 },
        ],
        asks: vec![
            Level { price: 100.1, size: 1500.0 },
            Level { price: 100.5, size: 2500.0 },
        ],
        ts: chrono::Utc::now().timestamp_millis(),
    }
}

/// Programmable in-memory venue
pub struct FakeVenue {
    pub venue: VenueId,
    pub native: bool,
    /// Bars per symbol; `default_bars` serves everything not listed
    pub bars: HashMap<Symbol, Vec<Kline>>,
    pub default_bars: Vec<Kline>,
    pub book: BookSnapshot,
    pub funding: Option<f64>,
    /// Symbols whose klines reads fail transiently
    pub failing: Vec<Symbol>,
    pub klines_calls: AtomicUsize,
}

impl FakeVenue {
    pub fn new(venue: VenueId) -> Self {
        Self {
            venue,
            native: true,
            bars: HashMap::new(),
            default_bars: bar_series(168, venue as u64),
            book: deep_book(),
            funding: None,
            failing: Vec::new(),
            klines_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VenueAdapter for FakeVenue {
    fn venue(&self) -> VenueId {
        self.venue
    }

    fn exchange_native(&self) -> bool {
        self.native
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        _interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ScanError> {
        self.klines_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(symbol) {
            return Err(ScanError::TransientIo {
                venue: self.venue.to_string(),
                message: "synthetic outage".into(),
            });
        }
        let bars = self
            .bars
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.default_bars.clone());
        Ok(bars.into_iter().rev().take(limit).rev().collect())
    }

    async fn trades(&self, _symbol: &Symbol, _limit: usize) -> Result<Vec<Trade>, ScanError> {
        Ok(Vec::new())
    }

    async fn book(&self, _symbol: &Symbol) -> Result<BookSnapshot, ScanError> {
        let mut book = self.book.clone();
        book.ts = chrono::Utc::now().timestamp_millis();
        Ok(book)
    }

    async fn funding_rate(&self, _symbol: &Symbol) -> Result<Option<f64>, ScanError> {
        Ok(self.funding)
    }

    async fn ping(&self) -> Result<(), ScanError> {
        Ok(())
    }
}

/// Twelve symbols, enough to clear the residualization minimum
pub const UNIVERSE_12: &str = "\
ADA/USD 8000000
AVAX/USD 6000000
BTC/USD 50000000
DOGE/USD 9000000
DOT/USD 5000000
ETH/USD 30000000
LINK/USD 7000000
LTC/USD 6000000
SOL/USD 20000000
UNI/USD 5000000
XLM/USD 5000000
XRP/USD 10000000
";

/// A fully wired scanner stack over fakes and temp storage
pub struct TestRig {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<ScanStore>,
    pub bus: Arc<ProgressBus>,
    pub facade: Arc<DataFacade>,
    pub regime: Arc<RegimeDetector>,
    pub cfg: ScannerConfig,
    _tmp: TempDir,
}

/// Build a rig with the given universe text and adapters
pub fn rig_with(
    universe: &str,
    adapters: VenueRegistry,
    tune: impl FnOnce(&mut ScannerConfig),
) -> TestRig {
    let tmp = tempfile::tempdir().expect("tempdir");
    let universe_path = tmp.path().join("universe.txt");
    std::fs::write(&universe_path, universe).expect("write universe");

    let mut cfg = ScannerConfig::default();
    cfg.universe_path = universe_path;
    cfg.data_dir = tmp.path().join("data");
    cfg.pipeline.max_workers = 4;
    // Generous token budgets so tests never wait on the pacer
    for provider in cfg.providers.values_mut() {
        provider.tokens_per_sec = 1000;
    }
    tune(&mut cfg);

    let limiters = Arc::new(LimiterRegistry::new(&cfg.providers));
    let cache = Arc::new(TieredCache::new(cfg.cache.clone()));
    let facade = Arc::new(DataFacade::new(adapters, limiters, cache, &cfg));
    let regime = Arc::new(RegimeDetector::new(cfg.regime.clone()));
    let store = Arc::new(ScanStore::new(cfg.data_dir.clone()).expect("store"));
    let bus = Arc::new(ProgressBus::default());

    let orchestrator = Arc::new(Orchestrator::new(
        cfg.clone(),
        Arc::clone(&facade),
        Arc::clone(&regime),
        Arc::new(NullSocial),
        Arc::clone(&store),
        Arc::clone(&bus),
    ));

    TestRig {
        orchestrator,
        store,
        bus,
        facade,
        regime,
        cfg,
        _tmp: tmp,
    }
}

/// Healthy three-venue registry
pub fn healthy_adapters() -> VenueRegistry {
    let mut adapters: VenueRegistry = HashMap::new();
    for venue in VenueId::ALL {
        adapters.insert(venue, Arc::new(FakeVenue::new(venue)) as Arc<dyn VenueAdapter>);
    }
    adapters
}

/// Default rig: 12 symbols, healthy venues
pub fn default_rig() -> TestRig {
    rig_with(UNIVERSE_12, healthy_adapters(), |_| {})
}
