//! Read-only HTTP query surface
//!
//! Four endpoints over the latest scan state, behind CORS, request
//! tracing, and a global rate limit. Strictly read-only: the scanner and
//! scheduler own all writes.
//!
//! ## Architecture
//!
//! - `routes`: endpoint handlers
//! - `middleware`: governor-based rate limiting with Retry-After

pub mod middleware;
pub mod routes;

pub use middleware::RequestLimiter;

use crate::facade::DataFacade;
use crate::regime::RegimeDetector;
use crate::store::ScanStore;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ScanStore>,
    pub regime: Arc<RegimeDetector>,
    pub facade: Arc<DataFacade>,
}

/// Build the router with middleware attached
pub fn create_router(state: AppState, rate_limit: u32) -> Router {
    let limiter = RequestLimiter::new(rate_limit);

    Router::new()
        .route("/api/v1/candidates", get(routes::get_candidates))
        .route("/api/v1/explain/{symbol}", get(routes::get_explain))
        .route("/api/v1/regime", get(routes::get_regime))
        .route("/api/v1/health", get(routes::get_health))
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::check_rate_limit,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
