//! Kraken REST adapter
//!
//! Public market-data endpoints only: OHLC, Depth, Trades, Time. Kraken
//! wraps every response in `{"error": [...], "result": {...}}` with the
//! pair name as a dynamic key, so parsing goes through `serde_json::Value`.

use super::{finalize_klines, http_client, parse_num, VenueAdapter};
use crate::error::ScanError;
use crate::types::{BookSnapshot, Interval, Kline, Level, Symbol, Trade, VenueId};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.kraken.com";

/// Kraken spot market-data client
#[derive(Clone, Debug)]
pub struct KrakenVenue {
    client: reqwest::Client,
    base_url: String,
}

impl KrakenVenue {
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

    /// Kraken pair name: BTC trades as XBT, no separator
    fn pair(symbol: &Symbol) -> String {
        let base = match symbol.base() {
            "BTC" => "XBT",
            other => other,
        };
        format!("{}USD", base)
    }

    /// Unwrap Kraken's `{error, result}` envelope
    async fn fetch_result(&self, url: &str) -> Result<serde_json::Value, ScanError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::from_http("kraken", e))?;
        let response = response
            .error_for_status()
            .map_err(|e| ScanError::from_http("kraken", e))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScanError::from_http("kraken", e))?;

        if let Some(errors) = body["error"].as_array() {
            if !errors.is_empty() {
                return Err(ScanError::Validation(format!(
                    "kraken error: {}",
                    serde_json::to_string(errors).unwrap_or_default()
                )));
            }
        }
        Ok(body["result"].clone())
    }

    /// Result objects are keyed by pair name variants (e.g. XXBTZUSD);
    /// take the first key that is not the pagination cursor.
    fn pair_value(result: &serde_json::Value) -> Result<&serde_json::Value, ScanError> {
        result
            .as_object()
            .and_then(|map| map.iter().find(|(k, _)| *k != "last"))
            .map(|(_, v)| v)
            .ok_or_else(|| ScanError::Validation("kraken result missing pair data".into()))
    }
}

impl Default for KrakenVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for KrakenVenue {
    fn venue(&self) -> VenueId {
        VenueId::Kraken
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ScanError> {
        let url = format!(
            "{}/0/public/OHLC?pair={}&interval={}",
            self.base_url,
            Self::pair(symbol),
            interval.minutes()
        );
        let result = self.fetch_result(&url).await?;
        let rows = Self::pair_value(&result)?
            .as_array()
            .ok_or_else(|| ScanError::Validation("kraken OHLC rows not an array".into()))?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            let cells = row
                .as_array()
                .filter(|c| c.len() >= 7)
                .ok_or_else(|| ScanError::Validation("kraken OHLC row too short".into()))?;
            let text = |i: usize| cells[i].as_str().unwrap_or_default();
            bars.push(Kline {
                open_time: cells[0].as_i64().unwrap_or(0) * 1000,
                open: parse_num(VenueId::Kraken, "open", text(1))?,
                high: parse_num(VenueId::Kraken, "high", text(2))?,
                low: parse_num(VenueId::Kraken, "low", text(3))?,
                close: parse_num(VenueId::Kraken, "close", text(4))?,
                volume: parse_num(VenueId::Kraken, "volume", text(6))?,
            });
        }
        Ok(finalize_klines(VenueId::Kraken, symbol, bars, limit))
    }

    async fn trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, ScanError> {
        let url = format!(
            "{}/0/public/Trades?pair={}",
            self.base_url,
            Self::pair(symbol)
        );
        let result = self.fetch_result(&url).await?;
        let rows = Self::pair_value(&result)?
            .as_array()
            .ok_or_else(|| ScanError::Validation("kraken trades not an array".into()))?;

        let mut trades = Vec::with_capacity(rows.len().min(limit));
        for row in rows.iter().rev().take(limit).rev() {
            let cells = row
                .as_array()
                .filter(|c| c.len() >= 4)
                .ok_or_else(|| ScanError::Validation("kraken trade row too short".into()))?;
            trades.push(Trade {
                price: parse_num(VenueId::Kraken, "price", cells[0].as_str().unwrap_or_default())?,
                size: parse_num(VenueId::Kraken, "size", cells[1].as_str().unwrap_or_default())?,
                ts: (cells[2].as_f64().unwrap_or(0.0) * 1000.0) as i64,
                buyer_taker: cells[3].as_str() == Some("b"),
            });
        }
        Ok(trades)
    }

    async fn book(&self, symbol: &Symbol) -> Result<BookSnapshot, ScanError> {
        let url = format!(
            "{}/0/public/Depth?pair={}&count=100",
            self.base_url,
            Self::pair(symbol)
        );
        let result = self.fetch_result(&url).await?;
        let sides = Self::pair_value(&result)?;

        let parse_side = |name: &str| -> Result<Vec<Level>, ScanError> {
            sides[name]
                .as_array()
                .ok_or_else(|| {
                    ScanError::Validation(format!("kraken depth missing {} side", name))
                })?
                .iter()
                .map(|row| {
                    let cells = row.as_array().filter(|c| c.len() >= 2).ok_or_else(|| {
                        ScanError::Validation("kraken depth level too short".into())
                    })?;
                    Ok(Level {
                        price: parse_num(
                            VenueId::Kraken,
                            "price",
                            cells[0].as_str().unwrap_or_default(),
                        )?,
                        size: parse_num(
                            VenueId::Kraken,
                            "size",
                            cells[1].as_str().unwrap_or_default(),
                        )?,
                    })
                })
                .collect()
        };

        let book = BookSnapshot {
            bids: parse_side("bids")?,
            asks: parse_side("asks")?,
            ts: Utc::now().timestamp_millis(),
        };
        book.validate()
            .map_err(|reason| ScanError::Validation(format!("kraken book invalid: {}", reason)))?;
        Ok(book)
    }

    async fn ping(&self) -> Result<(), ScanError> {
        let url = format!("{}/0/public/Time", self.base_url);
        self.fetch_result(&url).await.map(|_| ())
    }
}
