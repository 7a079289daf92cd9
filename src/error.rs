//! Error Types and Handling
//!
//! Defines the structured error taxonomy used throughout the scanner.
//! Every component boundary returns a `ScanError` carrying its kind plus
//! the symbol/venue it relates to, so the orchestrator can aggregate
//! per-symbol failures without aborting the scan.

use std::time::Duration;
use thiserror::Error;

/// Classification of a venue call failure, used by the circuit breaker.
///
/// Only `Transient` and `RateLimit` outcomes count toward opening the
/// breaker; `Fatal` errors (bad symbol, malformed response) are surfaced
/// immediately and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection resets, 5xx responses
    Transient,
    /// HTTP 429 or venue-reported throttling
    RateLimit,
    /// Validation failures, 4xx responses, parse errors
    Fatal,
}

/// Main error type for the scanner core
///
/// Kinds mirror the propagation policy: provider-unavailable errors
/// (`BudgetExhausted`, `BreakerOpen`) allow fallback to a secondary venue,
/// history/freshness errors exclude a single symbol, and `PartialScan` /
/// `Aborted` describe whole-scan outcomes.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Malformed inputs or configuration; surfaced, never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// Provider token or monthly budget exhausted
    #[error("budget exhausted for {provider}, resets in {reset_in:?}")]
    BudgetExhausted {
        provider: String,
        reset_in: Duration,
    },

    /// Provider circuit breaker is open
    #[error("circuit breaker open for {provider}, retry after {retry_after:?}")]
    BreakerOpen {
        provider: String,
        retry_after: Duration,
    },

    /// Fewer bars than the caller's minimum at the target interval
    #[error("insufficient history for {symbol}@{venue}: {bars} bars, {required} required")]
    InsufficientHistory {
        symbol: String,
        venue: String,
        bars: usize,
        required: usize,
    },

    /// VADR window has fewer than 20 bars; metric is frozen
    #[error("VADR frozen for {symbol}: only {bars} bars in window")]
    VadrFrozen { symbol: String, bars: usize },

    /// L2 snapshot too old for gate use
    #[error("stale order book for {symbol}@{venue}: {age_ms}ms old")]
    StaleBook {
        symbol: String,
        venue: String,
        age_ms: i64,
    },

    /// Network-level failure; retried with bounded backoff by the limiter
    #[error("transient I/O error for {venue}: {message}")]
    TransientIo { venue: String, message: String },

    /// Scan completed but some symbols failed
    #[error("partial scan: {failed} of {total} symbols failed")]
    PartialScan { failed: usize, total: usize },

    /// External cancellation
    #[error("scan aborted")]
    Aborted,

    /// Scheduler declined to start a run because one is already active
    #[error("scheduler refused: job {job} already running")]
    SchedulerRefused { job: String },

    /// Unexpected internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Returns true if this error kind should trigger retry logic
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::TransientIo { .. })
    }

    /// Returns true when the facade may serve this read from a secondary venue
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            ScanError::BudgetExhausted { .. }
                | ScanError::BreakerOpen { .. }
                | ScanError::TransientIo { .. }
        )
    }

    /// Stable kind string recorded in scan records and HTTP bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Validation(_) => "VALIDATION",
            ScanError::BudgetExhausted { .. } => "BUDGET_EXHAUSTED",
            ScanError::BreakerOpen { .. } => "BREAKER_OPEN",
            ScanError::InsufficientHistory { .. } => "INSUFFICIENT_HISTORY",
            ScanError::VadrFrozen { .. } => "VADR_FROZEN",
            ScanError::StaleBook { .. } => "STALE_BOOK",
            ScanError::TransientIo { .. } => "TRANSIENT_IO",
            ScanError::PartialScan { .. } => "PARTIAL_SCAN",
            ScanError::Aborted => "ABORTED",
            ScanError::SchedulerRefused { .. } => "SKIPPED_OVERLAP",
            ScanError::Internal(_) => "INTERNAL",
        }
    }

    /// Breaker classification for venue call outcomes
    pub fn class(&self) -> ErrorClass {
        match self {
            ScanError::TransientIo { .. } => ErrorClass::Transient,
            ScanError::BudgetExhausted { .. } | ScanError::BreakerOpen { .. } => {
                ErrorClass::RateLimit
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Process exit code for the CLI control plane
    ///
    /// 0 success, 2 invalid configuration, 3 partial scan, 4 scheduler
    /// refused, 5 provider exhausted.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Validation(_) => 2,
            ScanError::PartialScan { .. } => 3,
            ScanError::SchedulerRefused { .. } => 4,
            ScanError::BudgetExhausted { .. } | ScanError::BreakerOpen { .. } => 5,
            _ => 1,
        }
    }
}

/// Classify a reqwest failure for breaker accounting
///
/// 429 and 418 (venue IP ban) are rate-limit class; timeouts, connect
/// failures and 5xx are transient; everything else is fatal.
pub fn classify_http_error(err: &reqwest::Error) -> ErrorClass {
    if err.is_timeout() || err.is_connect() {
        return ErrorClass::Transient;
    }
    if let Some(status) = err.status() {
        return match status.as_u16() {
            429 | 418 => ErrorClass::RateLimit,
            500..=599 => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        };
    }
    ErrorClass::Transient
}

// Error conversions from common error types
impl ScanError {
    /// Wrap a reqwest failure for a named venue
    pub fn from_http(venue: &str, err: reqwest::Error) -> Self {
        match classify_http_error(&err) {
            ErrorClass::RateLimit => ScanError::TransientIo {
                venue: venue.to_string(),
                message: format!("rate limited by venue: {}", err),
            },
            ErrorClass::Transient => ScanError::TransientIo {
                venue: venue.to_string(),
                message: format!("network error: {}", err),
            },
            ErrorClass::Fatal => {
                ScanError::Validation(format!("venue {} rejected request: {}", venue, err))
            }
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Internal(format!("failed to serialize record: {}", err))
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Internal(format!("I/O error: {}", err))
    }
}

// HTTP response conversion for the read-only query surface
impl axum::response::IntoResponse for ScanError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;
        use serde_json::json;

        let status = match &self {
            ScanError::Validation(_) => StatusCode::BAD_REQUEST,
            ScanError::BudgetExhausted { .. } | ScanError::BreakerOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ScanError::InsufficientHistory { .. }
            | ScanError::VadrFrozen { .. }
            | ScanError::StaleBook { .. } => StatusCode::NOT_FOUND,
            ScanError::TransientIo { .. } => StatusCode::BAD_GATEWAY,
            ScanError::PartialScan { .. } => StatusCode::OK,
            ScanError::Aborted | ScanError::SchedulerRefused { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ScanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let retry_after = match &self {
            ScanError::BreakerOpen { retry_after, .. } => Some(retry_after.as_secs()),
            ScanError::BudgetExhausted { reset_in, .. } => Some(reset_in.as_secs()),
            _ => None,
        };

        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
