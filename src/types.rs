//! Core domain types for the momentum scanner
//!
//! Shared vocabulary used across the pipeline: symbols, venues, kline
//! intervals, order-book snapshots, and the cache tier/kind keys. All
//! validation lives next to the types so upstream modules can assume
//! well-formed values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stablecoin bases excluded from the scan universe
pub const STABLECOIN_BASES: &[&str] = &["USDT", "USDC", "DAI", "BUSD", "TUSD", "USDP"];

static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{2,12}/USD$").expect("symbol regex is valid"));

/// Trading pair as uppercase `BASE/QUOTE` with `QUOTE = USD`
///
/// Stablecoin bases are rejected at parse time, so every `Symbol` in the
/// system is a scannable USD spot pair. Immutable once constructed.
///
/// # Examples
///
/// ```
/// use momentum_scanner::types::Symbol;
/// use std::str::FromStr;
///
/// let sym = Symbol::from_str("BTC/USD").unwrap();
/// assert_eq!(sym.base(), "BTC");
/// assert!(Symbol::from_str("USDT/USD").is_err());
/// assert!(Symbol::from_str("btc/usd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Base asset, e.g. `BTC` for `BTC/USD`
    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Always `USD` for a valid symbol
    pub fn quote(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or("USD")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !SYMBOL_RE.is_match(s) {
            return Err(format!(
                "invalid symbol '{}': expected uppercase BASE/USD (e.g. BTC/USD, SOL/USD)",
                s
            ));
        }
        let base = s.split('/').next().unwrap_or_default();
        if STABLECOIN_BASES.contains(&base) {
            return Err(format!("stablecoin base '{}' is excluded from the universe", base));
        }
        Ok(Symbol(s.to_string()))
    }
}

impl TryFrom<String> for Symbol {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Symbol::from_str(&s)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> String {
        s.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported venues
///
/// All three are exchange-native; the microstructure path additionally
/// checks `VenueAdapter::exchange_native()` so that a future aggregator
/// adapter can never slip through that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Kraken,
    Binance,
    Coinbase,
}

impl VenueId {
    pub const ALL: [VenueId; 3] = [VenueId::Kraken, VenueId::Binance, VenueId::Coinbase];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Kraken => "kraken",
            VenueId::Binance => "binance",
            VenueId::Coinbase => "coinbase",
        }
    }
}

impl FromStr for VenueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kraken" => Ok(VenueId::Kraken),
            "binance" => Ok(VenueId::Binance),
            "coinbase" => Ok(VenueId::Coinbase),
            _ => Err(format!(
                "unknown venue '{}'. Must be kraken, binance, or coinbase",
                s
            )),
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kline interval used by the momentum timeframes and VADR windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    H1,
    H4,
    H12,
    D1,
}

impl Interval {
    pub fn minutes(&self) -> u32 {
        match self {
            Interval::H1 => 60,
            Interval::H4 => 240,
            Interval::H12 => 720,
            Interval::D1 => 1440,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single OHLCV bar
///
/// Invariant: `low <= min(open, close)`, `max(open, close) <= high`,
/// `volume >= 0`. Venue adapters call `validate` before returning bars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Bar open time, UTC milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Kline {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite())
        {
            return Err("kline contains non-finite values".to_string());
        }
        if self.volume < 0.0 {
            return Err(format!("negative volume {}", self.volume));
        }
        if self.low > self.open.min(self.close) || self.high < self.open.max(self.close) {
            return Err(format!(
                "OHLC ordering violated: o={} h={} l={} c={}",
                self.open, self.high, self.low, self.close
            ));
        }
        Ok(())
    }

    /// Per-bar volume-adjusted range term: `((high - low) / close) * sqrt(volume) * 100`
    pub fn vadr_term(&self) -> f64 {
        if self.close <= 0.0 {
            return 0.0;
        }
        (self.high - self.low) / self.close * self.volume.max(0.0).sqrt() * 100.0
    }
}

/// One price level of an L2 book side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

/// Exchange-native L1/L2 order-book snapshot
///
/// Bids sorted descending and asks ascending by price. Invariant:
/// `best_bid < best_ask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    /// Snapshot capture time, UTC milliseconds
    pub ts: i64,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Spread in basis points: `(ask - bid) / mid * 10000`
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// USD notional within `pct` of mid on the bid side
    pub fn depth_bid_usd(&self, pct: f64) -> f64 {
        let Some(mid) = self.mid() else { return 0.0 };
        let floor = mid * (1.0 - pct);
        self.bids
            .iter()
            .filter(|l| l.price >= floor)
            .map(|l| l.price * l.size)
            .sum()
    }

    /// USD notional within `pct` of mid on the ask side
    pub fn depth_ask_usd(&self, pct: f64) -> f64 {
        let Some(mid) = self.mid() else { return 0.0 };
        let ceiling = mid * (1.0 + pct);
        self.asks
            .iter()
            .filter(|l| l.price <= ceiling)
            .map(|l| l.price * l.size)
            .sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid >= ask => {
                Err(format!("crossed book: bid {} >= ask {}", bid, ask))
            }
            (None, _) | (_, None) => Err("empty book side".to_string()),
            _ => Ok(()),
        }
    }
}

/// A single public trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub size: f64,
    /// Trade time, UTC milliseconds
    pub ts: i64,
    /// True when the taker was a buyer
    pub buyer_taker: bool,
}

/// Cache tier controlling TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Prices and books, a few seconds
    Hot,
    /// Aggregates, seconds to minutes
    Warm,
    /// Token metadata, up to a day
    Cold,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Hot => "hot",
            CacheTier::Warm => "warm",
            CacheTier::Cold => "cold",
        }
    }
}

/// Logical data kind, part of cache keys and provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Klines,
    Trades,
    Book,
    Funding,
    OpenInterest,
    Metadata,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Klines => "klines",
            DataKind::Trades => "trades",
            DataKind::Book => "book",
            DataKind::Funding => "funding",
            DataKind::OpenInterest => "open_interest",
            DataKind::Metadata => "metadata",
        }
    }

    /// Books are venue-specific: fallback substitution is forbidden
    pub fn microstructure(&self) -> bool {
        matches!(self, DataKind::Book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse_valid() {
        let sym = Symbol::from_str("ETH/USD").unwrap();
        assert_eq!(sym.base(), "ETH");
        assert_eq!(sym.quote(), "USD");
        assert_eq!(sym.to_string(), "ETH/USD");
    }

    #[test]
    fn test_symbol_rejects_stablecoins_and_bad_quotes() {
        for bad in ["USDT/USD", "USDC/USD", "DAI/USD", "BUSD/USD"] {
            assert!(Symbol::from_str(bad).is_err(), "{} should be rejected", bad);
        }
        assert!(Symbol::from_str("BTC/EUR").is_err());
        assert!(Symbol::from_str("btc/usd").is_err());
        assert!(Symbol::from_str("BTCUSD").is_err());
    }

    #[test]
    fn test_symbol_serde_round_trip() {
        let sym = Symbol::from_str("SOL/USD").unwrap();
        let json = serde_json::to_string(&sym).unwrap();
        assert_eq!(json, "\"SOL/USD\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sym);
        assert!(serde_json::from_str::<Symbol>("\"USDT/USD\"").is_err());
    }

    #[test]
    fn test_kline_validation() {
        let good = Kline {
            open_time: 0,
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 1000.0,
        };
        assert!(good.validate().is_ok());

        let crossed = Kline {
            high: 99.0,
            ..good
        };
        assert!(crossed.validate().is_err());

        let negative = Kline {
            volume: -1.0,
            ..good
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_vadr_term() {
        let bar = Kline {
            open_time: 0,
            open: 100.0,
            high: 102.0,
            low: 98.0,
            close: 100.0,
            volume: 2500.0,
        };
        // (102-98)/100 * sqrt(2500) * 100 = 0.04 * 50 * 100 = 200
        assert!((bar.vadr_term() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_book_spread_and_depth() {
        let book = BookSnapshot {
            bids: vec![
                Level { price: 99.5, size: 10.0 },
                Level { price: 98.0, size: 20.0 },
                Level { price: 90.0, size: 50.0 },
            ],
            asks: vec![
                Level { price: 100.5, size: 10.0 },
                Level { price: 101.5, size: 20.0 },
                Level { price: 110.0, size: 50.0 },
            ],
            ts: 0,
        };
        assert!(book.validate().is_ok());
        assert_eq!(book.mid(), Some(100.0));
        // (100.5 - 99.5) / 100 * 10000 = 100 bps
        assert!((book.spread_bps().unwrap() - 100.0).abs() < 1e-9);
        // Within 2% of mid (>= 98.0): 99.5*10 + 98*20 = 2955
        assert!((book.depth_bid_usd(0.02) - 2955.0).abs() < 1e-9);
        // Within 2% of mid (<= 102.0): 100.5*10 + 101.5*20 = 3035
        assert!((book.depth_ask_usd(0.02) - 3035.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossed_book_rejected() {
        let book = BookSnapshot {
            bids: vec![Level { price: 101.0, size: 1.0 }],
            asks: vec![Level { price: 100.0, size: 1.0 }],
            ts: 0,
        };
        assert!(book.validate().is_err());
    }

    #[test]
    fn test_venue_round_trip() {
        for venue in VenueId::ALL {
            assert_eq!(VenueId::from_str(venue.as_str()).unwrap(), venue);
        }
        assert!(VenueId::from_str("dexscreener").is_err());
    }

    #[test]
    fn test_microstructure_kinds() {
        assert!(DataKind::Book.microstructure());
        assert!(!DataKind::Klines.microstructure());
        assert!(!DataKind::Funding.microstructure());
    }
}
