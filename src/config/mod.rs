//! Configuration Management
//!
//! Every threshold the pipeline uses is configuration with a validated
//! default, loaded from `SCANNER_*` environment variables. A config that
//! fails `validate()` maps to CLI exit code 2.

use crate::error::ScanError;
use crate::types::VenueId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Read an env var, falling back to a default, with a parse error that
/// names the variable.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ScanError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            ScanError::Validation(format!("{} has invalid value '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

/// HTTP query-surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub addr: SocketAddr,
    /// Requests per minute across all clients
    pub rate_limit: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".parse().expect("valid default addr"),
            rate_limit: 120,
        }
    }
}

/// Per-provider budget and breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Sustained request tokens per second
    pub tokens_per_sec: u32,
    /// Monthly request cap; 0 disables the cap
    pub monthly_cap: u64,
    /// Consecutive failures before the breaker opens
    pub breaker_failures: u32,
    /// Initial open interval; doubles on repeated trips
    pub breaker_base: Duration,
    /// Open interval ceiling
    pub breaker_ceiling: Duration,
    /// Secondary venue for non-microstructure fallback
    pub secondary: Option<VenueId>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            tokens_per_sec: 10,
            monthly_cap: 0,
            breaker_failures: 5,
            breaker_base: Duration::from_secs(30),
            breaker_ceiling: Duration::from_secs(600),
            secondary: None,
        }
    }
}

/// Cache TTLs per tier plus capacity bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub hot_ttl: Duration,
    pub warm_ttl: Duration,
    /// VADR / volume aggregates
    pub vadr_ttl: Duration,
    pub metadata_ttl: Duration,
    pub max_entries: usize,
    /// Periodic sweep cadence for expired entries
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_ttl: Duration::from_secs(5),
            warm_ttl: Duration::from_secs(60),
            vadr_ttl: Duration::from_secs(300),
            metadata_ttl: Duration::from_secs(86_400),
            max_entries: 8192,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Regime detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// 7d realized vol at or below this supports `trending`
    pub vol7d_low: f64,
    /// 7d realized vol at or above this forces `high_vol`
    pub vol7d_high: f64,
    /// Breadth (fraction above 20-bar MA) at or above this supports `trending`
    pub breadth_high: f64,
    /// Consecutive agreeing ticks required to switch regimes
    pub confirm_ticks: u32,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            vol7d_low: 0.35,
            vol7d_high: 0.80,
            breadth_high: 0.60,
            confirm_ticks: 2,
        }
    }
}

/// Policy when fewer than `funding_min_venues` report funding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FewVenuesPolicy {
    /// Gate records a deferred reason and does not block
    Defer,
    /// Gate is omitted from the trace entirely
    Skip,
}

/// Entry-gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Hard composite floor
    pub min_final_score: f64,
    /// Cross-venue funding divergence, in sigmas
    pub funding_z_min: f64,
    /// Venues required before the funding gate is decidable
    pub funding_min_venues: usize,
    pub few_venues_policy: FewVenuesPolicy,
    /// Newest-bar age limit, in bars, outside high-vol regimes
    pub max_bars_age: u32,
    /// Tighter bar-age limit under high volatility
    pub max_bars_age_high_vol: u32,
    /// 24h momentum above this is fatigued
    pub fatigue_threshold_pct: f64,
    /// 4h acceleration above this overrides fatigue
    pub accel_override_pct: f64,
    /// Signal-to-execution ceiling
    pub max_fill_delay: Duration,
    /// Provider p99 beyond this baseline may earn a grace window
    pub p99_baseline_ms: u64,
    pub grace_window: Duration,
    /// Price distance from trigger, in ATR units, allowed for grace
    pub atr_proximity_max: f64,
    /// Late-fill relaxations allowed per symbol per window
    pub relax_per_window: u32,
    pub relax_window: Duration,
    /// Social add-on ceiling in points
    pub social_cap: f64,
    /// When set, final score is clamped at 100 after the social add-on
    pub cap_final_at_100: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_final_score: 75.0,
            funding_z_min: 2.0,
            funding_min_venues: 3,
            few_venues_policy: FewVenuesPolicy::Defer,
            max_bars_age: 2,
            max_bars_age_high_vol: 1,
            fatigue_threshold_pct: 12.0,
            accel_override_pct: 2.0,
            max_fill_delay: Duration::from_secs(30),
            p99_baseline_ms: 400,
            grace_window: Duration::from_secs(15),
            atr_proximity_max: 1.2,
            relax_per_window: 3,
            relax_window: Duration::from_secs(1800),
            social_cap: 10.0,
            cap_final_at_100: false,
        }
    }
}

/// Orchestrator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker pool upper bound; effective parallelism is min(symbols, this)
    pub max_workers: usize,
    /// Candidates admitted to gate evaluation
    pub top_k: usize,
    /// Minimum batch size for residualization
    pub min_residual_batch: usize,
    /// Whole-scan deadline
    pub scan_deadline: Duration,
    /// Minimum bars required from klines reads
    pub min_bars: usize,
    /// Book snapshots older than this are unusable for gates
    pub max_book_age: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            top_k: 20,
            min_residual_batch: 10,
            scan_deadline: Duration::from_secs(120),
            min_bars: 20,
            max_book_age: Duration::from_secs(2),
        }
    }
}

/// Scheduler cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub hot_period: Duration,
    pub warm_period: Duration,
    pub regime_period: Duration,
    pub premove_enabled: bool,
    pub premove_period: Duration,
    /// Shutdown drain allowance for in-flight jobs
    pub drain_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hot_period: Duration::from_secs(15 * 60),
            warm_period: Duration::from_secs(2 * 3600),
            regime_period: Duration::from_secs(4 * 3600),
            premove_enabled: false,
            premove_period: Duration::from_secs(3600),
            drain_deadline: Duration::from_secs(30),
        }
    }
}

/// Top-level scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Directory for append-only scan records, manifests, regime history
    pub data_dir: PathBuf,
    /// Universe file (ordered symbols with minimum ADV)
    pub universe_path: PathBuf,
    /// Primary venue for facade reads
    pub primary_venue: VenueId,
    pub http: HttpConfig,
    pub providers: HashMap<VenueId, ProviderConfig>,
    pub cache: CacheConfig,
    pub regime: RegimeConfig,
    pub gates: GateConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            VenueId::Kraken,
            ProviderConfig {
                secondary: Some(VenueId::Binance),
                ..ProviderConfig::default()
            },
        );
        providers.insert(
            VenueId::Binance,
            ProviderConfig {
                secondary: Some(VenueId::Coinbase),
                ..ProviderConfig::default()
            },
        );
        providers.insert(VenueId::Coinbase, ProviderConfig::default());

        Self {
            data_dir: PathBuf::from("data"),
            universe_path: PathBuf::from("universe.txt"),
            primary_venue: VenueId::Kraken,
            http: HttpConfig::default(),
            providers,
            cache: CacheConfig::default(),
            regime: RegimeConfig::default(),
            gates: GateConfig::default(),
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from environment variables over defaults
    ///
    /// Recognized variables (all optional):
    /// `SCANNER_DATA_DIR`, `SCANNER_UNIVERSE`, `SCANNER_HTTP_ADDR`,
    /// `SCANNER_HTTP_RATE_LIMIT`, `SCANNER_PRIMARY_VENUE`,
    /// `SCANNER_MAX_WORKERS`, `SCANNER_TOP_K`, `SCANNER_MIN_SCORE`,
    /// `SCANNER_SCAN_DEADLINE_SECS`.
    pub fn from_env() -> Result<Self, ScanError> {
        let mut cfg = Self::default();

        if let Ok(dir) = std::env::var("SCANNER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("SCANNER_UNIVERSE") {
            cfg.universe_path = PathBuf::from(path);
        }
        cfg.http.addr = env_parse("SCANNER_HTTP_ADDR", cfg.http.addr)?;
        cfg.http.rate_limit = env_parse("SCANNER_HTTP_RATE_LIMIT", cfg.http.rate_limit)?;
        cfg.primary_venue = env_parse("SCANNER_PRIMARY_VENUE", cfg.primary_venue)?;
        cfg.pipeline.max_workers = env_parse("SCANNER_MAX_WORKERS", cfg.pipeline.max_workers)?;
        cfg.pipeline.top_k = env_parse("SCANNER_TOP_K", cfg.pipeline.top_k)?;
        cfg.gates.min_final_score = env_parse("SCANNER_MIN_SCORE", cfg.gates.min_final_score)?;
        let deadline_secs: u64 = env_parse(
            "SCANNER_SCAN_DEADLINE_SECS",
            cfg.pipeline.scan_deadline.as_secs(),
        )?;
        cfg.pipeline.scan_deadline = Duration::from_secs(deadline_secs);

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.http.rate_limit == 0 {
            return Err(ScanError::Validation(
                "http.rate_limit must be greater than 0".into(),
            ));
        }
        if self.pipeline.max_workers == 0 {
            return Err(ScanError::Validation(
                "pipeline.max_workers must be greater than 0".into(),
            ));
        }
        if self.pipeline.top_k == 0 {
            return Err(ScanError::Validation(
                "pipeline.top_k must be greater than 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.gates.min_final_score) {
            return Err(ScanError::Validation(format!(
                "gates.min_final_score {} outside [0,100]",
                self.gates.min_final_score
            )));
        }
        if self.gates.funding_min_venues < 2 {
            return Err(ScanError::Validation(
                "gates.funding_min_venues must be at least 2".into(),
            ));
        }
        if self.regime.vol7d_low >= self.regime.vol7d_high {
            return Err(ScanError::Validation(format!(
                "regime thresholds inverted: vol7d_low {} >= vol7d_high {}",
                self.regime.vol7d_low, self.regime.vol7d_high
            )));
        }
        if self.regime.confirm_ticks == 0 {
            return Err(ScanError::Validation(
                "regime.confirm_ticks must be at least 1".into(),
            ));
        }
        for (venue, provider) in &self.providers {
            if provider.tokens_per_sec == 0 {
                return Err(ScanError::Validation(format!(
                    "provider {} tokens_per_sec must be greater than 0",
                    venue
                )));
            }
            if provider.secondary == Some(*venue) {
                return Err(ScanError::Validation(format!(
                    "provider {} cannot be its own secondary",
                    venue
                )));
            }
        }
        if !self.providers.contains_key(&self.primary_venue) {
            return Err(ScanError::Validation(format!(
                "primary venue {} has no provider config",
                self.primary_venue
            )));
        }
        Ok(())
    }

    pub fn provider(&self, venue: VenueId) -> ProviderConfig {
        self.providers.get(&venue).cloned().unwrap_or_default()
    }
}
