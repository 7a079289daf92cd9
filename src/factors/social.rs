//! Social sentiment sources
//!
//! The social factor is a plug-in: implementations map a symbol to a raw
//! sentiment score. Only the downstream cap on the additive contribution
//! is normative; the formula inside a source is not. The default source
//! contributes nothing, keeping the pipeline deterministic without a
//! sentiment feed.

use crate::error::ScanError;
use crate::types::Symbol;
use async_trait::async_trait;
use std::collections::HashMap;

/// Pluggable sentiment provider
#[async_trait]
pub trait SocialSource: Send + Sync {
    /// Raw sentiment score for a symbol; larger means hotter. The scorer
    /// rank-normalizes and caps the contribution regardless of scale.
    async fn sentiment(&self, symbol: &Symbol) -> Result<f64, ScanError>;

    fn name(&self) -> &'static str;
}

/// Default source: no sentiment feed, zero contribution
pub struct NullSocial;

#[async_trait]
impl SocialSource for NullSocial {
    async fn sentiment(&self, _symbol: &Symbol) -> Result<f64, ScanError> {
        Ok(0.0)
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Fixed per-symbol scores, used by tests and replay harnesses
pub struct StaticSocial {
    scores: HashMap<Symbol, f64>,
}

impl StaticSocial {
    pub fn new(scores: HashMap<Symbol, f64>) -> Self {
        Self { scores }
    }
}

#[async_trait]
impl SocialSource for StaticSocial {
    async fn sentiment(&self, symbol: &Symbol) -> Result<f64, ScanError> {
        Ok(self.scores.get(symbol).copied().unwrap_or(0.0))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
