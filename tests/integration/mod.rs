//! Integration tests for the momentum scanner
//!
//! End-to-end coverage over in-memory venues: full scan runs, cache
//! single-flight, gate scenarios, regime hysteresis, scheduler semantics,
//! the HTTP query surface, and venue adapter parsing against wiremock.

mod common;

mod cache;
mod gates;
mod http_api;
mod pipeline;
mod regime;
mod scheduler;
mod venues;
