//! Provider rate limiting and circuit breaking
//!
//! Each venue gets a token budget (sustained tokens/second via a GCRA
//! limiter, plus an optional monthly cap) and a circuit breaker. `acquire`
//! blocks up to a deadline for a token, failing fast when the breaker is
//! open or the budget is gone. Call outcomes feed back through
//! `record_success`/`record_failure` so the breaker sees provider health.

pub mod breaker;

pub use breaker::{Breaker, BreakerSnapshot, BreakerState, ProbeOutcome};

use crate::config::ProviderConfig;
use crate::error::{ErrorClass, ScanError};
use crate::types::VenueId;
use chrono::{Datelike, TimeZone, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Observability snapshot of one provider's limiter
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub venue: VenueId,
    pub tokens_per_sec: u32,
    pub monthly_used: u64,
    /// 0 means uncapped
    pub monthly_cap: u64,
    /// Seconds until the monthly window resets
    pub monthly_reset_secs: i64,
    pub breaker: BreakerSnapshot,
}

/// Token budget + breaker for one provider
pub struct ProviderLimiter {
    venue: VenueId,
    tokens_per_sec: u32,
    limiter: DirectLimiter,
    monthly_cap: u64,
    monthly_used: AtomicU64,
    /// `year * 12 + month0` of the window `monthly_used` belongs to
    month_index: AtomicU32,
    breaker: Breaker,
}

impl ProviderLimiter {
    pub fn new(venue: VenueId, cfg: &ProviderConfig) -> Self {
        let per_sec = NonZeroU32::new(cfg.tokens_per_sec.max(1)).expect("tokens_per_sec >= 1");
        Self {
            venue,
            tokens_per_sec: per_sec.get(),
            limiter: GovernorRateLimiter::direct(Quota::per_second(per_sec)),
            monthly_cap: cfg.monthly_cap,
            monthly_used: AtomicU64::new(0),
            month_index: AtomicU32::new(Self::current_month_index()),
            breaker: Breaker::new(cfg.breaker_failures, cfg.breaker_base, cfg.breaker_ceiling),
        }
    }

    fn current_month_index() -> u32 {
        let now = Utc::now();
        now.year() as u32 * 12 + now.month0()
    }

    /// Seconds until the first instant of next month
    fn monthly_reset_secs() -> i64 {
        let now = Utc::now();
        let (year, month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        let next = Utc
            .with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        (next - now).num_seconds().max(0)
    }

    fn roll_month(&self) {
        let current = Self::current_month_index();
        let stored = self.month_index.load(Ordering::Acquire);
        if stored != current
            && self
                .month_index
                .compare_exchange(stored, current, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.monthly_used.store(0, Ordering::Release);
        }
    }

    /// Acquire `cost` tokens, waiting up to `deadline`
    ///
    /// Fails fast with `BreakerOpen` when the breaker rejects, and with
    /// `BudgetExhausted` when the monthly cap is hit or the deadline
    /// expires before tokens free up.
    pub async fn acquire(&self, cost: u32, deadline: Duration) -> Result<(), ScanError> {
        if let Err(retry_after) = self.breaker.allow() {
            return Err(ScanError::BreakerOpen {
                provider: self.venue.to_string(),
                retry_after,
            });
        }

        self.roll_month();
        if self.monthly_cap > 0 {
            let used = self.monthly_used.load(Ordering::Acquire);
            if used + cost as u64 > self.monthly_cap {
                return Err(ScanError::BudgetExhausted {
                    provider: self.venue.to_string(),
                    reset_in: Duration::from_secs(Self::monthly_reset_secs() as u64),
                });
            }
        }

        let cost_nz = NonZeroU32::new(cost.max(1)).expect("cost >= 1");
        let wait = self.limiter.until_n_ready(cost_nz);
        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(())) => {
                self.monthly_used.fetch_add(cost as u64, Ordering::AcqRel);
                Ok(())
            }
            Ok(Err(_)) => Err(ScanError::Validation(format!(
                "requested {} tokens exceeds {}'s burst capacity",
                cost, self.venue
            ))),
            Err(_) => Err(ScanError::BudgetExhausted {
                provider: self.venue.to_string(),
                reset_in: Duration::from_secs(1),
            }),
        }
    }

    /// Feed a call outcome into the breaker
    pub fn record_success(&self) {
        self.breaker.record_success();
    }

    pub fn record_failure(&self, class: ErrorClass) {
        self.breaker.record_failure(class);
    }

    pub fn breaker(&self) -> &Breaker {
        &self.breaker
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        LimiterSnapshot {
            venue: self.venue,
            tokens_per_sec: self.tokens_per_sec,
            monthly_used: self.monthly_used.load(Ordering::Acquire),
            monthly_cap: self.monthly_cap,
            monthly_reset_secs: Self::monthly_reset_secs(),
            breaker: self.breaker.snapshot(),
        }
    }
}

/// All provider limiters, keyed by venue
pub struct LimiterRegistry {
    providers: HashMap<VenueId, Arc<ProviderLimiter>>,
}

impl LimiterRegistry {
    pub fn new(configs: &HashMap<VenueId, ProviderConfig>) -> Self {
        let providers = configs
            .iter()
            .map(|(venue, cfg)| (*venue, Arc::new(ProviderLimiter::new(*venue, cfg))))
            .collect();
        Self { providers }
    }

    pub fn get(&self, venue: VenueId) -> Option<Arc<ProviderLimiter>> {
        self.providers.get(&venue).cloned()
    }

    pub fn snapshots(&self) -> Vec<LimiterSnapshot> {
        let mut snaps: Vec<LimiterSnapshot> =
            self.providers.values().map(|p| p.snapshot()).collect();
        snaps.sort_by_key(|s| s.venue.as_str());
        snaps
    }
}
