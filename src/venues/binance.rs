//! Binance.US REST adapter
//!
//! USD spot pairs trade on Binance.US; the derivatives funding rate comes
//! from the global futures API against the USDT-margined perpetual of the
//! same base asset.

use super::{finalize_klines, http_client, parse_num, VenueAdapter};
use crate::error::ScanError;
use crate::types::{BookSnapshot, Interval, Kline, Level, Symbol, Trade, VenueId};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.binance.us";
const DEFAULT_FUNDING_URL: &str = "https://fapi.binance.com";

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeRow {
    price: String,
    qty: String,
    time: i64,
    is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    last_funding_rate: String,
}

/// Binance.US spot market-data client
#[derive(Clone, Debug)]
pub struct BinanceVenue {
    client: reqwest::Client,
    base_url: String,
    funding_url: Option<String>,
}

impl BinanceVenue {
    pub fn new() -> Self {
        Self {
            client: http_client(Duration::from_secs(10)),
            base_url: DEFAULT_BASE_URL.to_string(),
            funding_url: Some(DEFAULT_FUNDING_URL.to_string()),
        }
    }

    /// Custom base URL, used by tests; disables the funding endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(10)),
            base_url: base_url.into(),
            funding_url: None,
        }
    }

    pub fn with_funding_url(mut self, funding_url: impl Into<String>) -> Self {
        self.funding_url = Some(funding_url.into());
        self
    }

    /// Spot symbol: BTC/USD -> BTCUSD
    fn spot_symbol(symbol: &Symbol) -> String {
        format!("{}USD", symbol.base())
    }

    /// Perp symbol on the futures API: BTC/USD -> BTCUSDT
    fn perp_symbol(symbol: &Symbol) -> String {
        format!("{}USDT", symbol.base())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ScanError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::from_http("binance", e))?;
        let response = response
            .error_for_status()
            .map_err(|e| ScanError::from_http("binance", e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| ScanError::from_http("binance", e))
    }
}

impl Default for BinanceVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BinanceVenue {
    fn venue(&self) -> VenueId {
        VenueId::Binance
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ScanError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            Self::spot_symbol(symbol),
            interval.as_str(),
            limit.min(1000)
        );
        let rows: Vec<serde_json::Value> = self.get_json(&url).await?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in &rows {
            let cells = row
                .as_array()
                .filter(|c| c.len() >= 6)
                .ok_or_else(|| ScanError::Validation("binance kline row too short".into()))?;
            let text = |i: usize| cells[i].as_str().unwrap_or_default();
            bars.push(Kline {
                open_time: cells[0].as_i64().unwrap_or(0),
                open: parse_num(VenueId::Binance, "open", text(1))?,
                high: parse_num(VenueId::Binance, "high", text(2))?,
                low: parse_num(VenueId::Binance, "low", text(3))?,
                close: parse_num(VenueId::Binance, "close", text(4))?,
                volume: parse_num(VenueId::Binance, "volume", text(5))?,
            });
        }
        Ok(finalize_klines(VenueId::Binance, symbol, bars, limit))
    }

    async fn trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, ScanError> {
        let url = format!(
            "{}/api/v3/trades?symbol={}&limit={}",
            self.base_url,
            Self::spot_symbol(symbol),
            limit.min(1000)
        );
        let rows: Vec<TradeRow> = self.get_json(&url).await?;
        rows.iter()
            .map(|row| {
                Ok(Trade {
                    price: parse_num(VenueId::Binance, "price", &row.price)?,
                    size: parse_num(VenueId::Binance, "qty", &row.qty)?,
                    ts: row.time,
                    buyer_taker: !row.is_buyer_maker,
                })
            })
            .collect()
    }

    async fn book(&self, symbol: &Symbol) -> Result<BookSnapshot, ScanError> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit=100",
            self.base_url,
            Self::spot_symbol(symbol)
        );
        let depth: DepthResponse = self.get_json(&url).await?;

        let parse_side = |levels: &[(String, String)]| -> Result<Vec<Level>, ScanError> {
            levels
                .iter()
                .map(|(price, size)| {
                    Ok(Level {
                        price: parse_num(VenueId::Binance, "price", price)?,
                        size: parse_num(VenueId::Binance, "size", size)?,
                    })
                })
                .collect()
        };

        let book = BookSnapshot {
            bids: parse_side(&depth.bids)?,
            asks: parse_side(&depth.asks)?,
            ts: Utc::now().timestamp_millis(),
        };
        book.validate()
            .map_err(|reason| ScanError::Validation(format!("binance book invalid: {}", reason)))?;
        Ok(book)
    }

    async fn funding_rate(&self, symbol: &Symbol) -> Result<Option<f64>, ScanError> {
        let Some(funding_url) = &self.funding_url else {
            return Ok(None);
        };
        let url = format!(
            "{}/fapi/v1/premiumIndex?symbol={}",
            funding_url,
            Self::perp_symbol(symbol)
        );
        let index: PremiumIndex = self.get_json(&url).await?;
        Ok(Some(parse_num(
            VenueId::Binance,
            "lastFundingRate",
            &index.last_funding_rate,
        )?))
    }

    async fn ping(&self) -> Result<(), ScanError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        self.get_json::<serde_json::Value>(&url).await.map(|_| ())
    }
}
