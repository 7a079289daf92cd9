//! Coinbase Exchange REST adapter
//!
//! Public market-data endpoints: candles, level-2 book, trades, time.
//! Coinbase returns candles newest-first and as raw numbers; only hourly
//! and daily granularities are available, which covers the scanner since
//! higher-timeframe returns are derived from the 1h series.

use super::{finalize_klines, http_client, parse_num, VenueAdapter};
use crate::error::ScanError;
use crate::types::{BookSnapshot, Interval, Kline, Level, Symbol, Trade, VenueId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";

#[derive(Debug, Deserialize)]
struct BookResponse {
    bids: Vec<(String, String, serde_json::Value)>,
    asks: Vec<(String, String, serde_json::Value)>,
}

#[derive(Debug, Deserialize)]
struct TradeRow {
    time: String,
    price: String,
    size: String,
    /// Maker order side; a "sell" maker means the taker bought
    side: String,
}

/// Coinbase Exchange market-data client
#[derive(Clone, Debug)]
pub struct CoinbaseVenue {
    client: reqwest::Client,
    base_url: String,
}

impl CoinbaseVenue {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Custom base URL, used by tests to point at a mock server
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(10)),
            base_url: base_url.into(),
        }
    }

    /// Product id: BTC/USD -> BTC-USD
    fn product(symbol: &Symbol) -> String {
        format!("{}-USD", symbol.base())
    }

    fn granularity(interval: Interval) -> Result<u32, ScanError> {
        match interval {
            Interval::H1 => Ok(3600),
            Interval::D1 => Ok(86_400),
            other => Err(ScanError::Validation(format!(
                "coinbase does not serve {} candles",
                other
            ))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ScanError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::from_http("coinbase", e))?;
        let response = response
            .error_for_status()
            .map_err(|e| ScanError::from_http("coinbase", e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| ScanError::from_http("coinbase", e))
    }
}

impl Default for CoinbaseVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for CoinbaseVenue {
    fn venue(&self) -> VenueId {
        VenueId::Coinbase
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ScanError> {
        let url = format!(
            "{}/products/{}/candles?granularity={}",
            self.base_url,
            Self::product(symbol),
            Self::granularity(interval)?
        );
        // Rows are [time, low, high, open, close, volume], newest first
        let rows: Vec<[f64; 6]> = self.get_json(&url).await?;

        let bars = rows
            .iter()
            .map(|row| Kline {
                open_time: (row[0] as i64) * 1000,
                low: row[1],
                high: row[2],
                open: row[3],
                close: row[4],
                volume: row[5],
            })
            .collect();
        Ok(finalize_klines(VenueId::Coinbase, symbol, bars, limit))
    }

    async fn trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, ScanError> {
        let url = format!(
            "{}/products/{}/trades?limit={}",
            self.base_url,
            Self::product(symbol),
            limit.min(1000)
        );
        let rows: Vec<TradeRow> = self.get_json(&url).await?;

        let mut trades = rows
            .iter()
            .map(|row| {
                let ts = row
                    .time
                    .parse::<DateTime<Utc>>()
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0);
                Ok(Trade {
                    price: parse_num(VenueId::Coinbase, "price", &row.price)?,
                    size: parse_num(VenueId::Coinbase, "size", &row.size)?,
                    ts,
                    buyer_taker: row.side == "sell",
                })
            })
            .collect::<Result<Vec<Trade>, ScanError>>()?;
        trades.sort_by_key(|t| t.ts);
        Ok(trades)
    }

    async fn book(&self, symbol: &Symbol) -> Result<BookSnapshot, ScanError> {
        let url = format!(
            "{}/products/{}/book?level=2",
            self.base_url,
            Self::product(symbol)
        );
        let response: BookResponse = self.get_json(&url).await?;

        let parse_side =
            |levels: &[(String, String, serde_json::Value)]| -> Result<Vec<Level>, ScanError> {
                levels
                    .iter()
                    .map(|(price, size, _)| {
                        Ok(Level {
                            price: parse_num(VenueId::Coinbase, "price", price)?,
                            size: parse_num(VenueId::Coinbase, "size", size)?,
                        })
                    })
                    .collect()
            };

        let book = BookSnapshot {
            bids: parse_side(&response.bids)?,
            asks: parse_side(&response.asks)?,
            ts: Utc::now().timestamp_millis(),
        };
        book.validate().map_err(|reason| {
            ScanError::Validation(format!("coinbase book invalid: {}", reason))
        })?;
        Ok(book)
    }

    async fn ping(&self) -> Result<(), ScanError> {
        let url = format!("{}/time", self.base_url);
        self.get_json::<serde_json::Value>(&url).await.map(|_| ())
    }
}
