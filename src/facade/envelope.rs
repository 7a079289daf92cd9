//! Point-in-time envelopes
//!
//! Every value that crosses a component boundary is wrapped in an
//! `Envelope` carrying provenance: venue, symbol, capture timestamp, cache
//! tier, original source, a confidence score, and a sha256 checksum of the
//! canonical payload JSON. Envelopes are constructed by the facade and
//! never mutated afterwards.

use crate::error::ScanError;
use crate::types::{CacheTier, Symbol, VenueId};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default bound on venue clock drift, in milliseconds
pub const DEFAULT_SKEW_MS: i64 = 2_000;

/// Immutable carrier of a value with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub venue: VenueId,
    pub symbol: Symbol,
    /// Capture time, UTC milliseconds
    pub timestamp: i64,
    pub tier: CacheTier,
    /// Where the data actually came from; differs from `venue` after a
    /// fallback read, e.g. `"binance (fallback for kraken)"`
    pub original_source: String,
    pub confidence_score: f64,
    /// sha256 of the canonical payload JSON, hex encoded
    pub checksum: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Construct and seal an envelope
    ///
    /// Enforces the timestamp invariant: a capture time further in the
    /// future than the venue's clock-drift bound is rejected rather than
    /// silently accepted, since every freshness decision downstream keys
    /// off this field.
    pub fn seal(
        venue: VenueId,
        symbol: Symbol,
        tier: CacheTier,
        original_source: impl Into<String>,
        confidence_score: f64,
        timestamp: i64,
        payload: serde_json::Value,
    ) -> Result<Self, ScanError> {
        Self::seal_at(
            venue,
            symbol,
            tier,
            original_source,
            confidence_score,
            timestamp,
            payload,
            Utc::now().timestamp_millis(),
            DEFAULT_SKEW_MS,
        )
    }

    /// Time-injected variant of [`Envelope::seal`] for deterministic tests
    #[allow(clippy::too_many_arguments)]
    pub fn seal_at(
        venue: VenueId,
        symbol: Symbol,
        tier: CacheTier,
        original_source: impl Into<String>,
        confidence_score: f64,
        timestamp: i64,
        payload: serde_json::Value,
        now_ms: i64,
        skew_ms: i64,
    ) -> Result<Self, ScanError> {
        if timestamp > now_ms + skew_ms {
            return Err(ScanError::Validation(format!(
                "envelope timestamp {}ms ahead of clock exceeds {}ms drift bound",
                timestamp - now_ms,
                skew_ms
            )));
        }
        if !(0.0..=1.0).contains(&confidence_score) {
            return Err(ScanError::Validation(format!(
                "confidence score {} outside [0,1]",
                confidence_score
            )));
        }
        let checksum = checksum_of(&payload);
        Ok(Self {
            venue,
            symbol,
            timestamp,
            tier,
            original_source: original_source.into(),
            confidence_score,
            checksum,
            payload,
        })
    }

    /// Age of the enveloped value in milliseconds
    pub fn age_ms(&self) -> i64 {
        self.age_ms_at(Utc::now().timestamp_millis())
    }

    pub fn age_ms_at(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp).max(0)
    }

    /// Decode the payload into its concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ScanError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ScanError::Internal(format!(
                "envelope payload for {}@{} failed to decode: {}",
                self.symbol, self.venue, e
            ))
        })
    }

    /// Compact reference recorded in scan records and manifests
    pub fn to_ref(&self) -> EnvelopeRef {
        EnvelopeRef {
            venue: self.venue,
            source: self.original_source.clone(),
            checksum: self.checksum.clone(),
            age_ms: self.age_ms(),
        }
    }
}

/// Reference to an envelope by checksum, for scan records and later GC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeRef {
    pub venue: VenueId,
    pub source: String,
    pub checksum: String,
    pub age_ms: i64,
}

/// sha256 over the canonical (serde_json string) form of a payload
pub fn checksum_of(payload: &serde_json::Value) -> String {
    let canonical = payload.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
