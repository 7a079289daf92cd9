//! Read-only query surface over a scanned rig

use crate::common::default_rig;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use momentum_scanner::http::{create_router, AppState};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn test_candidates_before_any_scan() {
    let rig = default_rig();
    let state = AppState {
        store: rig.store.clone(),
        regime: rig.regime.clone(),
        facade: rig.facade.clone(),
    };
    let router = create_router(state, 120);

    let response = router.oneshot(get("/api/v1/candidates")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "VALIDATION");
}

#[tokio::test]
async fn test_candidates_after_scan() {
    let rig = default_rig();
    rig.orchestrator
        .run(tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    let state = AppState {
        store: rig.store.clone(),
        regime: rig.regime.clone(),
        facade: rig.facade.clone(),
    };
    let router = create_router(state, 120);

    let response = router.oneshot(get("/api/v1/candidates")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let candidates = body["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 12);
    assert_eq!(candidates[0]["rank"], 1);
    assert!(candidates[0]["finalScore"].is_number());
    assert!(body["universeHash"].is_string());
}

#[tokio::test]
async fn test_explain_known_and_unknown_symbol() {
    let rig = default_rig();
    rig.orchestrator
        .run(tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    let state = AppState {
        store: rig.store.clone(),
        regime: rig.regime.clone(),
        facade: rig.facade.clone(),
    };
    let router = create_router(state, 120);

    let response = router
        .clone()
        .oneshot(get("/api/v1/explain/BTC%2FUSD"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["symbol"], "BTC/USD");
    assert!(body["factors"]["resid"].is_object());
    assert!(body["envelopes"].is_array());
    assert!(body["weights"].is_object());

    // Valid symbol never scanned
    let missing = router
        .clone()
        .oneshot(get("/api/v1/explain/PEPE%2FUSD"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    // Malformed symbol
    let bad = router.oneshot(get("/api/v1/explain/NOPE")).await.unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_regime_endpoint() {
    let rig = default_rig();
    let state = AppState {
        store: rig.store.clone(),
        regime: rig.regime.clone(),
        facade: rig.facade.clone(),
    };
    let router = create_router(state, 120);

    let response = router.oneshot(get("/api/v1/regime")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["label"].is_string());
    assert!(body["confidence"].is_number());
    let profile = &body["profile"];
    let sum = ["momentum", "technical", "volume", "quality", "catalyst"]
        .iter()
        .map(|k| profile[k].as_f64().unwrap())
        .sum::<f64>();
    assert!((sum - 1.0).abs() < 1e-9);
}

// Serialized: the health body reads the process-wide metrics registry
#[tokio::test]
#[serial_test::serial]
async fn test_health_endpoint() {
    let rig = default_rig();
    rig.orchestrator
        .run(tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    let state = AppState {
        store: rig.store.clone(),
        regime: rig.regime.clone(),
        facade: rig.facade.clone(),
    };
    let router = create_router(state, 120);

    let response = router.oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let venues = body["venues"].as_array().unwrap();
    assert_eq!(venues.len(), 3);
    assert!(venues[0]["limiter"]["breaker"]["state"].is_string());
    assert!(body["cache"]["warm"]["hit_ratio"].is_number());
    assert!(body["latestScan"].is_object());
}

#[tokio::test]
async fn test_rate_limit_sets_retry_after() {
    let rig = default_rig();
    let state = AppState {
        store: rig.store.clone(),
        regime: rig.regime.clone(),
        facade: rig.facade.clone(),
    };
    // 2 requests/minute, then 429
    let router = create_router(state, 2);

    let mut limited = None;
    for _ in 0..6 {
        let response = router
            .clone()
            .oneshot(get("/api/v1/regime"))
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited = Some(response);
            break;
        }
    }
    let response = limited.expect("burst must hit the rate limit");
    assert_eq!(response.headers()["Retry-After"], "1");
}
