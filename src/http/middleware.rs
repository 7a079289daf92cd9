//! Rate Limiting Middleware
//!
//! Limits requests to the read-only query surface so a hot dashboard
//! cannot starve the scanner. Rejected requests get a `Retry-After`.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Error type for rate limit exceeded
#[derive(Debug, Clone, Copy)]
pub struct RateLimitExceeded;

/// Global request limiter over the governor GCRA state
#[derive(Clone)]
pub struct RequestLimiter {
    inner: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RequestLimiter {
    /// Create a limiter allowing `requests_per_minute` across all clients
    ///
    /// ## Panics
    ///
    /// Panics if `requests_per_minute` is 0; configuration validation
    /// rejects that before a server can start.
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).expect("rate limit must be greater than 0"),
        );
        Self {
            inner: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), RateLimitExceeded> {
        self.inner.check().map_err(|_| RateLimitExceeded)
    }
}

/// Axum middleware: reject over-limit requests with 429 + Retry-After
pub async fn check_rate_limit(
    axum::extract::State(limiter): axum::extract::State<RequestLimiter>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<Response, Response> {
    if limiter.check().is_err() {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from_static("1"));
        return Err(response);
    }
    Ok(next.run(request).await)
}
