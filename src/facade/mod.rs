//! Multi-tier data facade
//!
//! The only component that talks to venues. Every read goes through the
//! provider limiter and the tiered cache (with single-flight refill), and
//! every returned value is wrapped in an [`Envelope`] with provenance and
//! checksum. Non-microstructure reads fall back to a configured secondary
//! venue when the primary's breaker is open or its budget is exhausted;
//! order-book reads never fall back and refuse aggregator adapters.

pub mod envelope;

pub use envelope::{Envelope, EnvelopeRef};

use crate::cache::{CacheKey, TieredCache};
use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::limiter::{LimiterRegistry, LimiterSnapshot};
use crate::metrics;
use crate::types::{BookSnapshot, CacheTier, DataKind, Interval, Kline, Symbol, Trade, VenueId};
use crate::venues::{VenueAdapter, VenueRegistry};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Health report for one provider, served by `/health` and `venue_health`
#[derive(Debug, Clone, Serialize)]
pub struct VenueHealth {
    pub venue: VenueId,
    pub exchange_native: bool,
    pub limiter: LimiterSnapshot,
    pub requests_ok: u64,
    pub requests_failed: u64,
}

/// Provenance description of a venue adapter
#[derive(Debug, Clone, Serialize)]
pub struct SourceAttribution {
    pub venue: VenueId,
    pub exchange_native: bool,
    /// Data kinds this adapter serves
    pub provides: Vec<DataKind>,
    /// Venue used when this one is unavailable (non-microstructure only)
    pub fallback: Option<VenueId>,
}

/// Uniform venue reads with caching, budgets, and provenance
pub struct DataFacade {
    adapters: VenueRegistry,
    limiters: Arc<LimiterRegistry>,
    cache: Arc<TieredCache>,
    fallbacks: HashMap<VenueId, VenueId>,
    min_bars: usize,
    max_book_age: Duration,
    acquire_deadline: Duration,
}

impl DataFacade {
    pub fn new(
        adapters: VenueRegistry,
        limiters: Arc<LimiterRegistry>,
        cache: Arc<TieredCache>,
        cfg: &ScannerConfig,
    ) -> Self {
        let fallbacks = cfg
            .providers
            .iter()
            .filter_map(|(venue, provider)| provider.secondary.map(|s| (*venue, s)))
            .collect();
        Self {
            adapters,
            limiters,
            cache,
            fallbacks,
            min_bars: cfg.pipeline.min_bars,
            max_book_age: cfg.pipeline.max_book_age,
            acquire_deadline: Duration::from_secs(10),
        }
    }

    fn adapter(&self, venue: VenueId) -> Result<Arc<dyn VenueAdapter>, ScanError> {
        self.adapters
            .get(&venue)
            .cloned()
            .ok_or_else(|| ScanError::Validation(format!("no adapter registered for {}", venue)))
    }

    /// Acquire budget, run the venue call, and feed the outcome back into
    /// the breaker and metrics.
    async fn guarded<T, Fut>(
        &self,
        venue: VenueId,
        call: impl FnOnce(Arc<dyn VenueAdapter>) -> Fut,
    ) -> Result<T, ScanError>
    where
        Fut: std::future::Future<Output = Result<T, ScanError>>,
    {
        let adapter = self.adapter(venue)?;
        let limiter = self
            .limiters
            .get(venue)
            .ok_or_else(|| ScanError::Validation(format!("no limiter configured for {}", venue)))?;
        limiter.acquire(1, self.acquire_deadline).await?;

        match call(adapter).await {
            Ok(value) => {
                limiter.record_success();
                metrics::registry().venue_ok(venue);
                Ok(value)
            }
            Err(err) => {
                limiter.record_failure(err.class());
                metrics::registry().venue_error(venue);
                Err(err)
            }
        }
    }

    fn source_label(venue: VenueId, fallback_for: Option<VenueId>) -> (String, f64) {
        match fallback_for {
            Some(primary) => (format!("{} (fallback for {})", venue, primary), 0.9),
            None => (venue.to_string(), 1.0),
        }
    }

    /// Most recent `n` bars for `symbol` at `interval`, oldest first
    ///
    /// Fewer than `min_bars` bars is `INSUFFICIENT_HISTORY`. On breaker
    /// open / budget exhaustion the configured secondary venue is tried
    /// and the envelope's `original_source` marks the substitution.
    pub async fn klines(
        &self,
        venue: VenueId,
        symbol: &Symbol,
        interval: Interval,
        n: usize,
    ) -> Result<Envelope, ScanError> {
        match self.klines_from(venue, symbol, interval, n, None).await {
            Err(err) if err.allows_fallback() => {
                let Some(secondary) = self.fallbacks.get(&venue).copied() else {
                    return Err(err);
                };
                tracing::warn!(
                    primary = %venue, %secondary, %symbol,
                    reason = err.kind(), "falling back for klines read"
                );
                self.klines_from(secondary, symbol, interval, n, Some(venue))
                    .await
            }
            other => other,
        }
    }

    async fn klines_from(
        &self,
        venue: VenueId,
        symbol: &Symbol,
        interval: Interval,
        n: usize,
        fallback_for: Option<VenueId>,
    ) -> Result<Envelope, ScanError> {
        let key = CacheKey::new(
            venue,
            symbol.clone(),
            DataKind::Klines,
            format!("{}:{}", interval, n),
        );
        let ttl = self.cache.ttl_for(DataKind::Klines);
        let min_bars = self.min_bars;
        let symbol_owned = symbol.clone();

        self.cache
            .get_or_fetch(key, ttl, || async move {
                let bars = self
                    .guarded(venue, |adapter| {
                        let symbol = symbol_owned.clone();
                        async move { adapter.klines(&symbol, interval, n).await }
                    })
                    .await?;
                if bars.len() < min_bars {
                    return Err(ScanError::InsufficientHistory {
                        symbol: symbol_owned.to_string(),
                        venue: venue.to_string(),
                        bars: bars.len(),
                        required: min_bars,
                    });
                }
                let (source, confidence) = Self::source_label(venue, fallback_for);
                Envelope::seal(
                    venue,
                    symbol_owned.clone(),
                    CacheTier::Warm,
                    source,
                    confidence,
                    Utc::now().timestamp_millis(),
                    serde_json::to_value(&bars)?,
                )
            })
            .await
    }

    /// Most recent public trades, oldest first
    pub async fn trades(
        &self,
        venue: VenueId,
        symbol: &Symbol,
        n: usize,
    ) -> Result<Envelope, ScanError> {
        let key = CacheKey::new(venue, symbol.clone(), DataKind::Trades, n.to_string());
        let ttl = self.cache.ttl_for(DataKind::Trades);
        let symbol_owned = symbol.clone();

        self.cache
            .get_or_fetch(key, ttl, || async move {
                let trades: Vec<Trade> = self
                    .guarded(venue, |adapter| {
                        let symbol = symbol_owned.clone();
                        async move { adapter.trades(&symbol, n).await }
                    })
                    .await?;
                Envelope::seal(
                    venue,
                    symbol_owned.clone(),
                    CacheTier::Hot,
                    venue.to_string(),
                    1.0,
                    Utc::now().timestamp_millis(),
                    serde_json::to_value(&trades)?,
                )
            })
            .await
    }

    /// Fresh L2 snapshot, exchange-native only, never substituted
    ///
    /// The cache TTL is capped at the gate freshness bound so a cached hit
    /// is always usable; a snapshot older than the bound is `STALE_BOOK`.
    pub async fn book(&self, venue: VenueId, symbol: &Symbol) -> Result<Envelope, ScanError> {
        let adapter = self.adapter(venue)?;
        if !adapter.exchange_native() {
            return Err(ScanError::Validation(format!(
                "venue {} is not exchange-native; aggregators are refused for microstructure",
                venue
            )));
        }

        let key = CacheKey::new(venue, symbol.clone(), DataKind::Book, "l2");
        let ttl = self.cache.ttl_for(DataKind::Book).min(self.max_book_age);
        let symbol_owned = symbol.clone();

        let env = self
            .cache
            .get_or_fetch(key, ttl, || async move {
                let book: BookSnapshot = self
                    .guarded(venue, |adapter| {
                        let symbol = symbol_owned.clone();
                        async move { adapter.book(&symbol).await }
                    })
                    .await?;
                Envelope::seal(
                    venue,
                    symbol_owned.clone(),
                    CacheTier::Hot,
                    venue.to_string(),
                    1.0,
                    book.ts,
                    serde_json::to_value(&book)?,
                )
            })
            .await?;

        let age_ms = env.age_ms();
        if age_ms > self.max_book_age.as_millis() as i64 {
            return Err(ScanError::StaleBook {
                symbol: symbol.to_string(),
                venue: venue.to_string(),
                age_ms,
            });
        }
        Ok(env)
    }

    /// Perpetual funding rate where the venue offers one
    pub async fn funding(
        &self,
        venue: VenueId,
        symbol: &Symbol,
    ) -> Result<Option<Envelope>, ScanError> {
        let key = CacheKey::new(venue, symbol.clone(), DataKind::Funding, "perp");
        let ttl = self.cache.ttl_for(DataKind::Funding);
        let symbol_owned = symbol.clone();

        let result = self
            .cache
            .get_or_fetch(key, ttl, || async move {
                let rate = self
                    .guarded(venue, |adapter| {
                        let symbol = symbol_owned.clone();
                        async move { adapter.funding_rate(&symbol).await }
                    })
                    .await?;
                let Some(rate) = rate else {
                    // Signal "venue has no funding" through a non-cacheable error
                    return Err(ScanError::Validation(format!(
                        "venue {} has no funding endpoint",
                        venue
                    )));
                };
                Envelope::seal(
                    venue,
                    symbol_owned.clone(),
                    CacheTier::Warm,
                    venue.to_string(),
                    1.0,
                    Utc::now().timestamp_millis(),
                    json!({ "rate": rate }),
                )
            })
            .await;

        match result {
            Ok(env) => Ok(Some(env)),
            Err(ScanError::Validation(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Decode helpers for enveloped payloads
    pub fn klines_of(env: &Envelope) -> Result<Vec<Kline>, ScanError> {
        env.decode()
    }

    pub fn book_of(env: &Envelope) -> Result<BookSnapshot, ScanError> {
        env.decode()
    }

    /// Breaker/budget/request health for one venue
    pub fn venue_health(&self, venue: VenueId) -> Result<VenueHealth, ScanError> {
        let adapter = self.adapter(venue)?;
        let limiter = self
            .limiters
            .get(venue)
            .ok_or_else(|| ScanError::Validation(format!("no limiter configured for {}", venue)))?;
        let counters = metrics::registry().venue_counters(venue);
        Ok(VenueHealth {
            venue,
            exchange_native: adapter.exchange_native(),
            limiter: limiter.snapshot(),
            requests_ok: counters.ok,
            requests_failed: counters.errors,
        })
    }

    /// Where this venue's data comes from and what it can serve
    pub fn source_attribution(&self, venue: VenueId) -> Result<SourceAttribution, ScanError> {
        let adapter = self.adapter(venue)?;
        Ok(SourceAttribution {
            venue,
            exchange_native: adapter.exchange_native(),
            provides: vec![
                DataKind::Klines,
                DataKind::Trades,
                DataKind::Book,
                DataKind::Funding,
            ],
            fallback: self.fallbacks.get(&venue).copied(),
        })
    }

    pub fn venues(&self) -> Vec<VenueId> {
        let mut venues: Vec<VenueId> = self.adapters.keys().copied().collect();
        venues.sort_by_key(|v| v.as_str());
        venues
    }
}
