//! Venue adapter parsing against wiremock servers

use momentum_scanner::types::{Interval, Symbol, VenueId};
use momentum_scanner::venues::{BinanceVenue, CoinbaseVenue, KrakenVenue, VenueAdapter};
use serde_json::json;
use std::str::FromStr;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn btc() -> Symbol {
    Symbol::from_str("BTC/USD").unwrap()
}

#[tokio::test]
async fn test_kraken_ohlc_parsing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/0/public/OHLC"))
        .and(query_param("pair", "XBTUSD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": [],
            "result": {
                "XXBTZUSD": [
                    [1700000000, "50000.0", "50500.0", "49800.0", "50200.0", "50100.0", "12.5", 100],
                    [1700003600, "50200.0", "50700.0", "50100.0", "50600.0", "50400.0", "8.25", 80]
                ],
                "last": 1700003600
            }
        })))
        .mount(&server)
        .await;

    let venue = KrakenVenue::with_base_url(server.uri());
    let bars = venue.klines(&btc(), Interval::H1, 10).await.unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].open_time, 1_700_000_000_000);
    assert_eq!(bars[0].open, 50_000.0);
    assert_eq!(bars[0].high, 50_500.0);
    assert_eq!(bars[0].volume, 12.5);
    assert!(bars[1].open_time > bars[0].open_time, "oldest first");
}

#[tokio::test]
async fn test_kraken_error_array_is_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/0/public/OHLC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": ["EQuery:Unknown asset pair"],
            "result": {}
        })))
        .mount(&server)
        .await;

    let venue = KrakenVenue::with_base_url(server.uri());
    let err = venue.klines(&btc(), Interval::H1, 10).await.unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");
    assert!(err.to_string().contains("Unknown asset pair"));
}

#[tokio::test]
async fn test_kraken_depth_parsing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/0/public/Depth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": [],
            "result": {
                "XXBTZUSD": {
                    "bids": [["50000.0", "1.5", 1700000000], ["49990.0", "2.0", 1700000000]],
                    "asks": [["50010.0", "1.2", 1700000000], ["50020.0", "3.0", 1700000000]]
                }
            }
        })))
        .mount(&server)
        .await;

    let venue = KrakenVenue::with_base_url(server.uri());
    let book = venue.book(&btc()).await.unwrap();

    assert_eq!(book.best_bid(), Some(50_000.0));
    assert_eq!(book.best_ask(), Some(50_010.0));
    assert!(book.spread_bps().unwrap() < 3.0);
    assert!(book.ts > 0);
}

#[tokio::test]
async fn test_kraken_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/0/public/OHLC"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let venue = KrakenVenue::with_base_url(server.uri());
    let err = venue.klines(&btc(), Interval::H1, 10).await.unwrap_err();
    assert_eq!(err.kind(), "TRANSIENT_IO");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_binance_klines_and_depth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "BTCUSD"))
        .and(query_param("interval", "1h"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            [1700000000000i64, "50000.0", "50500.0", "49800.0", "50200.0", "12.5", 1700003599999i64, "0", 100, "0", "0", "0"],
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lastUpdateId": 123,
            "bids": [["50000.0", "1.5"]],
            "asks": [["50010.0", "1.2"]]
        })))
        .mount(&server)
        .await;

    let venue = BinanceVenue::with_base_url(server.uri());
    let bars = venue.klines(&btc(), Interval::H1, 10).await.unwrap();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].close, 50_200.0);

    let book = venue.book(&btc()).await.unwrap();
    assert_eq!(book.best_bid(), Some(50_000.0));

    // Mock-pointed adapter has no funding endpoint
    assert_eq!(venue.funding_rate(&btc()).await.unwrap(), None);
}

#[tokio::test]
async fn test_coinbase_candles_reversed_to_oldest_first() {
    let server = MockServer::start().await;
    // Coinbase returns newest first: [time, low, high, open, close, volume]
    Mock::given(method("GET"))
        .and(path("/products/BTC-USD/candles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            [1700003600.0, 50100.0, 50700.0, 50200.0, 50600.0, 8.25],
            [1700000000.0, 49800.0, 50500.0, 50000.0, 50200.0, 12.5]
        ])))
        .mount(&server)
        .await;

    let venue = CoinbaseVenue::with_base_url(server.uri());
    let bars = venue.klines(&btc(), Interval::H1, 10).await.unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].open_time, 1_700_000_000_000);
    assert_eq!(bars[1].open_time, 1_700_003_600_000);
    assert_eq!(bars[0].low, 49_800.0);
    assert_eq!(bars[0].open, 50_000.0);
}

#[tokio::test]
async fn test_coinbase_book_level2() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/BTC-USD/book"))
        .and(query_param("level", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sequence": 12345,
            "bids": [["50000.0", "1.5", 3]],
            "asks": [["50010.0", "1.2", 2]]
        })))
        .mount(&server)
        .await;

    let venue = CoinbaseVenue::with_base_url(server.uri());
    let book = venue.book(&btc()).await.unwrap();
    assert_eq!(book.best_bid(), Some(50_000.0));
    assert_eq!(book.best_ask(), Some(50_010.0));
}

#[tokio::test]
async fn test_adapter_venue_ids() {
    assert_eq!(KrakenVenue::new().venue(), VenueId::Kraken);
    assert_eq!(BinanceVenue::new().venue(), VenueId::Binance);
    assert_eq!(CoinbaseVenue::new().venue(), VenueId::Coinbase);
    assert!(KrakenVenue::new().exchange_native());
}
