//! Scan universe loading
//!
//! The universe file is the ordered list of USD-quoted symbols eligible for
//! scanning, one `SYMBOL MIN_ADV_USD` pair per line. The file's sha256 is
//! recorded in every scan record so ranked lists can be traced back to the
//! exact universe that produced them.

use crate::error::ScanError;
use crate::types::Symbol;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// One universe entry: a scannable symbol and its minimum average daily
/// volume in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub symbol: Symbol,
    pub min_adv_usd: f64,
}

/// Parsed universe with the content hash of its source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub entries: Vec<UniverseEntry>,
    /// sha256 of the raw file bytes, hex encoded
    pub file_hash: String,
}

impl Universe {
    /// Load and validate a universe file
    ///
    /// Lines are `SYMBOL MIN_ADV_USD`; blank lines and `#` comments are
    /// ignored. Duplicate symbols, non-USD quotes, and stablecoin bases are
    /// validation errors — a bad universe aborts the scan before any venue
    /// call is made.
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Validation(format!("cannot read universe file {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Parse universe file contents
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        let file_hash = hex::encode(Sha256::digest(raw.as_bytes()));
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let sym_text = parts.next().unwrap_or_default();
            let symbol = Symbol::from_str(sym_text).map_err(|e| {
                ScanError::Validation(format!("universe line {}: {}", lineno + 1, e))
            })?;
            let min_adv_usd = match parts.next() {
                Some(adv) => adv.parse::<f64>().map_err(|_| {
                    ScanError::Validation(format!(
                        "universe line {}: invalid ADV '{}'",
                        lineno + 1,
                        adv
                    ))
                })?,
                None => 0.0,
            };
            if min_adv_usd < 0.0 {
                return Err(ScanError::Validation(format!(
                    "universe line {}: negative ADV {}",
                    lineno + 1,
                    min_adv_usd
                )));
            }
            if !seen.insert(symbol.clone()) {
                return Err(ScanError::Validation(format!(
                    "universe line {}: duplicate symbol {}",
                    lineno + 1,
                    symbol
                )));
            }
            entries.push(UniverseEntry { symbol, min_adv_usd });
        }

        if entries.is_empty() {
            return Err(ScanError::Validation("universe file is empty".into()));
        }

        Ok(Universe { entries, file_hash })
    }

    /// Symbols in deterministic scan order (sorted, regardless of file order)
    pub fn sorted_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.entries.iter().map(|e| e.symbol.clone()).collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
