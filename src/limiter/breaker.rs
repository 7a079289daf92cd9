//! Per-provider circuit breaker
//!
//! State machine `Closed -> Open -> HalfOpen -> Closed` driven by
//! classified call outcomes. Only transient and rate-limit failures count
//! toward opening; fatal (caller) errors pass through without tripping.
//! All hot-path operations are atomic loads and CAS transitions.
//!
//! Time is injected via `_at` suffixed methods (epoch milliseconds) so
//! tests control the clock; production wrappers use `Utc::now()`.

use crate::error::ErrorClass;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Breaker state visible in snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Outcome of the most recent half-open probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    None,
    Succeeded,
    Failed,
}

/// Point-in-time breaker observability snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub current_backoff_ms: u64,
    /// Milliseconds until the open interval elapses; 0 when not open
    pub open_remaining_ms: i64,
    pub last_probe: ProbeOutcome,
}

/// Circuit breaker with doubling open intervals and single half-open probes
#[derive(Debug)]
pub struct Breaker {
    threshold: u32,
    base_ms: u64,
    ceiling_ms: u64,
    state: AtomicU8,
    consecutive: AtomicU32,
    backoff_ms: AtomicU64,
    /// Epoch ms at which the open interval elapses
    open_until_ms: AtomicI64,
    /// Set once a half-open probe has been handed out
    probe_taken: AtomicU8,
    last_probe: AtomicU8,
}

impl Breaker {
    pub fn new(threshold: u32, base: Duration, ceiling: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            base_ms: base.as_millis() as u64,
            ceiling_ms: ceiling.as_millis().max(base.as_millis()) as u64,
            state: AtomicU8::new(STATE_CLOSED),
            consecutive: AtomicU32::new(0),
            backoff_ms: AtomicU64::new(base.as_millis() as u64),
            open_until_ms: AtomicI64::new(0),
            probe_taken: AtomicU8::new(0),
            last_probe: AtomicU8::new(0),
        }
    }

    /// Whether a call may proceed right now
    pub fn allow(&self) -> Result<(), Duration> {
        self.allow_at(Utc::now().timestamp_millis())
    }

    /// Time-injected variant of [`Breaker::allow`]
    ///
    /// Open breakers transition to half-open once the interval elapses and
    /// hand out exactly one probe; concurrent callers during the probe are
    /// rejected with the remaining backoff.
    pub fn allow_at(&self, now_ms: i64) -> Result<(), Duration> {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => Ok(()),
            STATE_OPEN => {
                let until = self.open_until_ms.load(Ordering::Acquire);
                if now_ms < until {
                    return Err(Duration::from_millis((until - now_ms).max(0) as u64));
                }
                // Interval elapsed: move to half-open and take the probe slot
                if self
                    .state
                    .compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.probe_taken.store(1, Ordering::Release);
                    return Ok(());
                }
                self.try_take_probe()
            }
            STATE_HALF_OPEN => self.try_take_probe(),
            _ => Ok(()),
        }
    }

    fn try_take_probe(&self) -> Result<(), Duration> {
        if self
            .probe_taken
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(())
        } else {
            Err(Duration::from_millis(self.backoff_ms.load(Ordering::Acquire)))
        }
    }

    /// Record a successful call; closes the breaker from half-open
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Release);
        let prev = self.state.swap(STATE_CLOSED, Ordering::AcqRel);
        if prev == STATE_HALF_OPEN {
            self.last_probe.store(1, Ordering::Release);
            self.backoff_ms.store(self.base_ms, Ordering::Release);
            tracing::info!("circuit breaker closed after successful probe");
        }
        self.probe_taken.store(0, Ordering::Release);
    }

    /// Record a failed call with its classification
    pub fn record_failure(&self, class: ErrorClass) {
        self.record_failure_at(class, Utc::now().timestamp_millis());
    }

    /// Time-injected variant of [`Breaker::record_failure`]
    pub fn record_failure_at(&self, class: ErrorClass, now_ms: i64) {
        if class == ErrorClass::Fatal {
            // Caller errors say nothing about provider health
            return;
        }

        let state = self.state.load(Ordering::Acquire);
        if state == STATE_HALF_OPEN {
            self.last_probe.store(2, Ordering::Release);
            self.reopen(now_ms, true);
            return;
        }

        let failures = self.consecutive.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold && state == STATE_CLOSED {
            self.reopen(now_ms, false);
        }
    }

    fn reopen(&self, now_ms: i64, double: bool) {
        let backoff = self.backoff_ms.load(Ordering::Acquire);
        let next = if double {
            (backoff * 2).min(self.ceiling_ms)
        } else {
            backoff
        };
        self.backoff_ms.store(next, Ordering::Release);
        self.open_until_ms
            .store(now_ms + next as i64, Ordering::Release);
        self.probe_taken.store(0, Ordering::Release);
        self.state.store(STATE_OPEN, Ordering::Release);
        tracing::warn!(backoff_ms = next, "circuit breaker opened");
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Utc::now().timestamp_millis())
    }

    pub fn snapshot_at(&self, now_ms: i64) -> BreakerSnapshot {
        let state = self.state();
        let open_remaining_ms = if state == BreakerState::Open {
            (self.open_until_ms.load(Ordering::Acquire) - now_ms).max(0)
        } else {
            0
        };
        BreakerSnapshot {
            state,
            consecutive_failures: self.consecutive.load(Ordering::Acquire),
            current_backoff_ms: self.backoff_ms.load(Ordering::Acquire),
            open_remaining_ms,
            last_probe: match self.last_probe.load(Ordering::Acquire) {
                1 => ProbeOutcome::Succeeded,
                2 => ProbeOutcome::Failed,
                _ => ProbeOutcome::None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> Breaker {
        Breaker::new(3, Duration::from_secs(30), Duration::from_secs(600))
    }

    #[test]
    fn test_closed_allows() {
        let b = breaker();
        assert!(b.allow_at(0).is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let b = breaker();
        b.record_failure_at(ErrorClass::Transient, 0);
        b.record_failure_at(ErrorClass::Transient, 10);
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure_at(ErrorClass::Transient, 20);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.allow_at(25).is_err());
    }

    #[test]
    fn test_fatal_errors_do_not_trip() {
        let b = breaker();
        for i in 0..10 {
            b.record_failure_at(ErrorClass::Fatal, i);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_single_probe() {
        let b = breaker();
        for i in 0..3 {
            b.record_failure_at(ErrorClass::RateLimit, i);
        }
        assert_eq!(b.state(), BreakerState::Open);

        // Before the interval elapses, calls are rejected
        assert!(b.allow_at(10_000).is_err());

        // After the interval, exactly one probe is allowed
        let after = 31_000;
        assert!(b.allow_at(after).is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.allow_at(after + 1).is_err());
    }

    #[test]
    fn test_probe_success_closes() {
        let b = breaker();
        for i in 0..3 {
            b.record_failure_at(ErrorClass::Transient, i);
        }
        assert!(b.allow_at(31_000).is_ok());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot_at(31_000).last_probe, ProbeOutcome::Succeeded);
        // Backoff reset to base after recovery
        assert_eq!(b.snapshot_at(31_000).current_backoff_ms, 30_000);
    }

    #[test]
    fn test_probe_failure_doubles_backoff() {
        let b = breaker();
        for i in 0..3 {
            b.record_failure_at(ErrorClass::Transient, i);
        }
        assert!(b.allow_at(31_000).is_ok());
        b.record_failure_at(ErrorClass::Transient, 31_100);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.snapshot_at(31_100).current_backoff_ms, 60_000);
        assert_eq!(b.snapshot_at(31_100).last_probe, ProbeOutcome::Failed);
        // Next window honors the doubled interval
        assert!(b.allow_at(31_100 + 59_000).is_err());
        assert!(b.allow_at(31_100 + 61_000).is_ok());
    }

    #[test]
    fn test_backoff_ceiling() {
        let b = Breaker::new(1, Duration::from_secs(30), Duration::from_secs(60));
        let mut now = 0;
        for _ in 0..6 {
            b.record_failure_at(ErrorClass::Transient, now);
            now += 10_000_000;
            assert!(b.allow_at(now).is_ok());
        }
        assert!(b.snapshot_at(now).current_backoff_ms <= 60_000);
    }
}
