//! Process-wide metrics registry
//!
//! One of the three well-known singletons (with the progress bus and the
//! scheduler clock). Counters are atomics; scan latencies keep a bounded
//! window so `/health` can report percentiles without unbounded growth.
//! `init()` resets the registry; tests call it to start from zero.

use crate::types::{CacheTier, VenueId};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Latency samples retained for percentile reporting
const LATENCY_WINDOW: usize = 256;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct VenueCounters {
    pub ok: u64,
    pub errors: u64,
}

/// Cache hit ratio for one tier
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Scan latency percentiles in milliseconds
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Full registry snapshot served by `/health`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub scans_total: u64,
    pub cache: HashMap<String, TierStats>,
    pub venues: HashMap<String, VenueCounters>,
    pub scan_latency: Option<LatencyStats>,
}

/// Global metrics registry
pub struct MetricsRegistry {
    scans_total: AtomicU64,
    hot: TierCounters,
    warm: TierCounters,
    cold: TierCounters,
    venues: Mutex<HashMap<VenueId, VenueCounters>>,
    scan_durations_ms: Mutex<Vec<f64>>,
}

impl MetricsRegistry {
    fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            hot: TierCounters::default(),
            warm: TierCounters::default(),
            cold: TierCounters::default(),
            venues: Mutex::new(HashMap::new()),
            scan_durations_ms: Mutex::new(Vec::new()),
        }
    }

    fn tier(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::Hot => &self.hot,
            CacheTier::Warm => &self.warm,
            CacheTier::Cold => &self.cold,
        }
    }

    pub fn cache_hit(&self, tier: CacheTier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self, tier: CacheTier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn venue_ok(&self, venue: VenueId) {
        self.venues.lock().entry(venue).or_default().ok += 1;
    }

    pub fn venue_error(&self, venue: VenueId) {
        self.venues.lock().entry(venue).or_default().errors += 1;
    }

    pub fn venue_counters(&self, venue: VenueId) -> VenueCounters {
        self.venues.lock().get(&venue).copied().unwrap_or_default()
    }

    pub fn scan_completed(&self, duration_ms: f64) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        let mut window = self.scan_durations_ms.lock();
        if window.len() >= LATENCY_WINDOW {
            window.remove(0);
        }
        window.push(duration_ms);
    }

    /// Reset all counters; used at startup and between tests
    pub fn reset(&self) {
        self.scans_total.store(0, Ordering::Relaxed);
        for tier in [CacheTier::Hot, CacheTier::Warm, CacheTier::Cold] {
            self.tier(tier).hits.store(0, Ordering::Relaxed);
            self.tier(tier).misses.store(0, Ordering::Relaxed);
        }
        self.venues.lock().clear();
        self.scan_durations_ms.lock().clear();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut cache = HashMap::new();
        for tier in [CacheTier::Hot, CacheTier::Warm, CacheTier::Cold] {
            let counters = self.tier(tier);
            let hits = counters.hits.load(Ordering::Relaxed);
            let misses = counters.misses.load(Ordering::Relaxed);
            let total = hits + misses;
            cache.insert(
                tier.as_str().to_string(),
                TierStats {
                    hits,
                    misses,
                    hit_ratio: if total > 0 {
                        hits as f64 / total as f64
                    } else {
                        0.0
                    },
                },
            );
        }

        let venues = self
            .venues
            .lock()
            .iter()
            .map(|(venue, counters)| (venue.to_string(), *counters))
            .collect();

        let durations = self.scan_durations_ms.lock().clone();
        let scan_latency = if durations.is_empty() {
            None
        } else {
            let mut data = Data::new(durations.clone());
            Some(LatencyStats {
                samples: durations.len(),
                p50_ms: data.percentile(50),
                p95_ms: data.percentile(95),
                p99_ms: data.percentile(99),
            })
        };

        MetricsSnapshot {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            cache,
            venues,
            scan_latency,
        }
    }
}

static REGISTRY: Lazy<MetricsRegistry> = Lazy::new(MetricsRegistry::new);

/// The global registry
pub fn registry() -> &'static MetricsRegistry {
    &REGISTRY
}

/// Initialize (reset) the global registry at process start
pub fn init() {
    REGISTRY.reset();
}
