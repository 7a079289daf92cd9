//! Append-only scan persistence
//!
//! One JSONL file per scan under `scans/`, an envelope manifest for the
//! external GC subsystem, and a regime transition history. Everything is
//! append-only; compaction and retention live outside the core. The store
//! also keeps the latest scan in memory so the read-only query surface
//! never touches disk on the hot path.

use crate::error::ScanError;
use crate::facade::EnvelopeRef;
use crate::factors::{FactorVector, ResidualVector};
use crate::gates::{GateAction, GateReason};
use crate::regime::{RegimeLabel, RegimeState, RegimeTransition, WeightProfile};
use crate::score::FactorContribution;
use crate::types::{Symbol, VenueId};
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Microstructure summary of the venue a candidate cleared (or the best
/// failing venue when none cleared)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroRecord {
    pub venue: VenueId,
    pub spread_bps: f64,
    pub depth_bid_usd: f64,
    pub depth_ask_usd: f64,
    pub vadr: f64,
    pub vadr_frozen: bool,
}

/// Composite score block of a scan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub base: f64,
    pub social_add: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

/// Factor block: raw inputs, residuals, and per-factor contributions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorsRecord {
    pub raw: FactorVector,
    pub resid: ResidualVector,
    pub contributions: Vec<FactorContribution>,
}

/// One candidate, written once per scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub scan_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub rank: u32,
    pub regime: RegimeLabel,
    pub weights: WeightProfile,
    pub factors: FactorsRecord,
    pub score: ScoreRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub micro: Option<MicroRecord>,
    /// Empty for candidates below the gate-evaluation cutoff
    pub gates: Vec<GateReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<GateAction>,
    /// Processing flags, e.g. `RESIDUALIZATION_SKIPPED`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    pub envelopes: Vec<EnvelopeRef>,
}

/// A symbol that failed during the scan, with the structured reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolError {
    pub symbol: Symbol,
    pub kind: String,
    pub message: String,
}

/// Full scan output
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regime: RegimeState,
    pub universe_hash: String,
    pub records: Vec<CandidateRecord>,
    pub errors: Vec<SymbolError>,
    /// Some symbols failed or the scan was cut short
    pub partial: bool,
}

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    scan_id: Uuid,
    timestamp: DateTime<Utc>,
    envelopes: &'a [EnvelopeRef],
}

/// Append-only store plus the in-memory latest-scan index
pub struct ScanStore {
    dir: PathBuf,
    latest: RwLock<Option<Arc<ScanResult>>>,
    by_symbol: RwLock<HashMap<Symbol, CandidateRecord>>,
}

impl ScanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ScanError> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("scans"))?;
        Ok(Self {
            dir,
            latest: RwLock::new(None),
            by_symbol: RwLock::new(HashMap::new()),
        })
    }

    fn append_line(path: &Path, line: &str) -> Result<(), ScanError> {
        Self::append_line_inner(path, line)
            .map_err(|e| ScanError::Internal(format!("{:#}", e)))
    }

    fn append_line_inner(path: &Path, line: &str) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("failed to append to {}", path.display()))?;
        Ok(())
    }

    /// Persist a finished scan: candidate records, envelope manifest, and
    /// the in-memory index for the query surface.
    pub fn persist(&self, result: ScanResult) -> Result<Arc<ScanResult>, ScanError> {
        let scan_path = self
            .dir
            .join("scans")
            .join(format!("{}.jsonl", result.scan_id));
        for record in &result.records {
            Self::append_line(&scan_path, &serde_json::to_string(record)?)?;
        }

        let manifest_path = self.dir.join("manifest.jsonl");
        for record in &result.records {
            if record.envelopes.is_empty() {
                continue;
            }
            let entry = ManifestEntry {
                scan_id: result.scan_id,
                timestamp: result.finished_at,
                envelopes: &record.envelopes,
            };
            Self::append_line(&manifest_path, &serde_json::to_string(&entry)?)?;
        }

        let result = Arc::new(result);
        {
            let mut by_symbol = self.by_symbol.write();
            for record in &result.records {
                by_symbol.insert(record.symbol.clone(), record.clone());
            }
        }
        *self.latest.write() = Some(Arc::clone(&result));
        tracing::info!(
            scan_id = %result.scan_id,
            candidates = result.records.len(),
            errors = result.errors.len(),
            "scan persisted"
        );
        Ok(result)
    }

    /// Record a regime transition in the history artifact
    pub fn append_regime_transition(&self, transition: &RegimeTransition) -> Result<(), ScanError> {
        let path = self.dir.join("regime_history.jsonl");
        Self::append_line(&path, &serde_json::to_string(transition)?)
    }

    /// Most recent persisted scan
    pub fn latest(&self) -> Option<Arc<ScanResult>> {
        self.latest.read().clone()
    }

    /// Factor/gate/provenance record from the last scan containing `symbol`
    pub fn explain(&self, symbol: &Symbol) -> Option<CandidateRecord> {
        self.by_symbol.read().get(symbol).cloned()
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }
}
