//! Venue adapters
//!
//! One REST adapter per exchange, all implementing [`VenueAdapter`]. The
//! facade talks only to this trait; adapters translate symbols, parse
//! venue-shaped JSON into domain types, and classify HTTP failures. All
//! three built-in adapters are exchange-native; `exchange_native()` exists
//! so the microstructure boundary can refuse any future aggregator.

pub mod binance;
pub mod coinbase;
pub mod kraken;

pub use binance::BinanceVenue;
pub use coinbase::CoinbaseVenue;
pub use kraken::KrakenVenue;

use crate::error::ScanError;
use crate::types::{BookSnapshot, Interval, Kline, Symbol, Trade, VenueId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Uniform venue read interface
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> VenueId;

    /// False for aggregator-backed adapters; such adapters are refused at
    /// the microstructure boundary
    fn exchange_native(&self) -> bool {
        true
    }

    /// Most recent `limit` bars at `interval`, oldest first
    async fn klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ScanError>;

    /// Most recent public trades, oldest first
    async fn trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, ScanError>;

    /// Current L2 snapshot
    async fn book(&self, symbol: &Symbol) -> Result<BookSnapshot, ScanError>;

    /// Perpetual funding rate where the venue offers one
    async fn funding_rate(&self, symbol: &Symbol) -> Result<Option<f64>, ScanError> {
        let _ = symbol;
        Ok(None)
    }

    /// Cheap liveness probe
    async fn ping(&self) -> Result<(), ScanError>;
}

/// Adapter registry keyed by venue
pub type VenueRegistry = HashMap<VenueId, Arc<dyn VenueAdapter>>;

/// Build the default registry with production base URLs
pub fn default_registry() -> VenueRegistry {
    let mut registry: VenueRegistry = HashMap::new();
    registry.insert(VenueId::Kraken, Arc::new(KrakenVenue::new()));
    registry.insert(VenueId::Binance, Arc::new(BinanceVenue::new()));
    registry.insert(VenueId::Coinbase, Arc::new(CoinbaseVenue::new()));
    registry
}

/// Shared HTTP client configuration for venue adapters
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("momentum-scanner/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to create HTTP client")
}

/// Parse a venue decimal string into f64
pub(crate) fn parse_num(venue: VenueId, field: &str, raw: &str) -> Result<f64, ScanError> {
    raw.parse::<f64>().map_err(|_| {
        ScanError::Validation(format!(
            "venue {} returned unparseable {}: '{}'",
            venue, field, raw
        ))
    })
}

/// Sort, truncate to the most recent `limit`, and validate a bar series.
/// Invalid bars are dropped with a warning rather than failing the read.
pub(crate) fn finalize_klines(
    venue: VenueId,
    symbol: &Symbol,
    mut bars: Vec<Kline>,
    limit: usize,
) -> Vec<Kline> {
    bars.sort_by_key(|k| k.open_time);
    bars.retain(|bar| match bar.validate() {
        Ok(()) => true,
        Err(reason) => {
            tracing::warn!(%venue, %symbol, %reason, "dropping invalid kline");
            false
        }
    });
    if bars.len() > limit {
        bars.drain(..bars.len() - limit);
    }
    bars
}
