//! Pipeline orchestrator
//!
//! Drives one scan end to end: universe resolution, regime profile
//! selection, bounded-parallel facade reads, factor residualization,
//! composite scoring, top-K gate evaluation, and append-only persistence.
//! The orchestrator is the only writer of scan-lifetime state; per-symbol
//! failures are captured in the result instead of aborting the scan.

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::facade::{DataFacade, EnvelopeRef};
use crate::factors::{
    catalyst, momentum, quality, residualize, technical, volume, FactorVector, SocialSource,
};
use crate::factors::residualize::RESIDUALIZATION_SKIPPED;
use crate::gates::{self, GateInputs};
use crate::metrics;
use crate::micro::{evaluate_venue, MicroProof};
use crate::progress::{Phase, ProgressBus};
use crate::regime::{inputs_from_series, RegimeDetector, RegimeState};
use crate::score::score_batch;
use crate::store::{
    CandidateRecord, FactorsRecord, MicroRecord, ScanResult, ScanStore, ScoreRecord, SymbolError,
};
use crate::types::{BookSnapshot, Interval, Kline, Symbol, VenueId};
use crate::universe::Universe;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 7 days of hourly bars, enough for every factor window
const KLINE_LOOKBACK: usize = 168;

/// Everything fetched for one symbol before the compute stages
struct SymbolData {
    symbol: Symbol,
    bars: Vec<Kline>,
    primary_book: Option<BookSnapshot>,
    funding: Vec<(VenueId, f64)>,
    envelopes: Vec<EnvelopeRef>,
    adv_usd: f64,
}

/// Tracks late-fill relaxations per symbol within the rolling window
struct RelaxLedger {
    window: std::time::Duration,
    granted: Mutex<HashMap<Symbol, Vec<Instant>>>,
}

impl RelaxLedger {
    fn new(window: std::time::Duration) -> Self {
        Self {
            window,
            granted: Mutex::new(HashMap::new()),
        }
    }

    fn count(&self, symbol: &Symbol) -> u32 {
        let now = Instant::now();
        let mut granted = self.granted.lock();
        let entries = granted.entry(symbol.clone()).or_default();
        entries.retain(|t| now.duration_since(*t) < self.window);
        entries.len() as u32
    }

    fn record(&self, symbol: &Symbol) {
        self.granted
            .lock()
            .entry(symbol.clone())
            .or_default()
            .push(Instant::now());
    }
}

/// Age of the newest bar in whole bars
fn bar_age_bars(last_open_ms: i64, now_ms: i64, interval: Interval) -> u32 {
    let interval_ms = interval.minutes() as i64 * 60_000;
    let close_ms = last_open_ms + interval_ms;
    if now_ms <= close_ms {
        return 0;
    }
    ((now_ms - close_ms) / interval_ms) as u32
}

/// End-to-end scan driver
pub struct Orchestrator {
    cfg: ScannerConfig,
    facade: Arc<DataFacade>,
    regime: Arc<RegimeDetector>,
    social: Arc<dyn SocialSource>,
    store: Arc<ScanStore>,
    bus: Arc<ProgressBus>,
    relax: RelaxLedger,
}

impl Orchestrator {
    pub fn new(
        cfg: ScannerConfig,
        facade: Arc<DataFacade>,
        regime: Arc<RegimeDetector>,
        social: Arc<dyn SocialSource>,
        store: Arc<ScanStore>,
        bus: Arc<ProgressBus>,
    ) -> Self {
        let relax = RelaxLedger::new(cfg.gates.relax_window);
        Self {
            cfg,
            facade,
            regime,
            social,
            store,
            bus,
            relax,
        }
    }

    pub fn bus(&self) -> Arc<ProgressBus> {
        Arc::clone(&self.bus)
    }

    /// Run one scan
    ///
    /// Per-symbol errors land in the result; the scan only fails outright
    /// on an empty universe, cancellation, or storage failure. A deadline
    /// overrun returns what completed, marked partial, with `ABORTED`
    /// errors for the symbols that never finished.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Arc<ScanResult>, ScanError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let scan_id = Uuid::new_v4();

        // 1. Universe, deterministically ordered
        let universe = Universe::load(&self.cfg.universe_path)?;
        let symbols = universe.sorted_symbols();
        let total = symbols.len() as u64;
        self.bus.start(scan_id, Phase::Init, total);
        tracing::info!(%scan_id, symbols = symbols.len(), "scan started");
        self.bus.ok(scan_id, Phase::Init, total, None);

        // 2. Active regime profile; cached value is authoritative
        let regime_state = self.regime.current();
        let profile = regime_state.profile.clone();

        // 3. Bounded-parallel facade reads
        self.bus.start(scan_id, Phase::Fetch, total);
        let workers = self.cfg.pipeline.max_workers.min(symbols.len().max(1));
        let mut data: Vec<SymbolData> = Vec::with_capacity(symbols.len());
        let mut errors: Vec<SymbolError> = Vec::new();
        let mut seen: HashSet<Symbol> = HashSet::new();
        let mut partial = false;

        {
            let fetches = stream::iter(symbols.clone())
                .map(|symbol| async move {
                    let result = self.fetch_symbol(&symbol).await;
                    (symbol, result)
                })
                .buffer_unordered(workers);
            tokio::pin!(fetches);

            let deadline = tokio::time::sleep(self.cfg.pipeline.scan_deadline);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.bus.error(scan_id, Phase::Fetch, None, "scan aborted".into());
                        return Err(ScanError::Aborted);
                    }
                    _ = &mut deadline => {
                        tracing::warn!(%scan_id, "scan deadline exceeded, continuing with partial data");
                        partial = true;
                        break;
                    }
                    next = fetches.next() => match next {
                        Some((symbol, Ok(sd))) => {
                            seen.insert(symbol.clone());
                            self.bus.progress(
                                scan_id,
                                Phase::Fetch,
                                Some(symbol),
                                (data.len() + errors.len() + 1) as u64,
                                total,
                            );
                            data.push(sd);
                        }
                        Some((symbol, Err(err))) => {
                            seen.insert(symbol.clone());
                            tracing::warn!(%symbol, error = %err, "symbol fetch failed");
                            errors.push(SymbolError {
                                symbol,
                                kind: err.kind().to_string(),
                                message: err.to_string(),
                            });
                        }
                        None => break,
                    }
                }
            }
        }

        for symbol in &symbols {
            if !seen.contains(symbol) {
                errors.push(SymbolError {
                    symbol: symbol.clone(),
                    kind: ScanError::Aborted.kind().to_string(),
                    message: "deadline exceeded before fetch".into(),
                });
            }
        }
        self.bus.ok(scan_id, Phase::Fetch, total, None);

        if data.is_empty() {
            self.bus
                .error(scan_id, Phase::Score, None, "no symbol produced data".into());
            return Err(ScanError::PartialScan {
                failed: errors.len(),
                total: symbols.len(),
            });
        }

        // 4. Factors over the batch, sorted for deterministic residuals
        self.bus.start(scan_id, Phase::Score, data.len() as u64);
        data.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut factor_batch: Vec<FactorVector> = Vec::with_capacity(data.len());
        for sd in &data {
            let returns = momentum::timeframe_returns(&sd.bars);
            let funding_rates: Vec<f64> = sd.funding.iter().map(|(_, r)| *r).collect();
            let funding_z =
                gates::funding_z_score(&funding_rates, self.cfg.gates.funding_min_venues);
            let social = self
                .social
                .sentiment(&sd.symbol)
                .await
                .unwrap_or_else(|err| {
                    tracing::debug!(symbol = %sd.symbol, error = %err, "social source failed");
                    0.0
                });
            let vector = FactorVector {
                symbol: sd.symbol.clone(),
                momentum_core: momentum::momentum_core(&returns, &profile.momentum_timeframes),
                technical: technical::technical_factor(&sd.bars),
                volume: volume::volume_factor(&sd.bars),
                quality: quality::quality_factor(sd.primary_book.as_ref(), &sd.bars),
                social,
                catalyst: catalyst::catalyst_factor(funding_z, &sd.bars),
            };
            if let Err(reason) = vector.validate() {
                errors.push(SymbolError {
                    symbol: sd.symbol.clone(),
                    kind: "VALIDATION".into(),
                    message: reason,
                });
                continue;
            }
            factor_batch.push(vector);
        }

        let outcome = residualize(&factor_batch, self.cfg.pipeline.min_residual_batch);
        let scores = score_batch(
            &outcome.vectors,
            &profile,
            self.cfg.gates.social_cap,
            self.cfg.gates.cap_final_at_100,
        );
        self.bus.ok(scan_id, Phase::Score, data.len() as u64, None);

        // 5. Rank by final score, symbol as deterministic tie-break
        self.bus.start(scan_id, Phase::Rank, scores.len() as u64);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .final_score
                .partial_cmp(&scores[a].final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| scores[a].symbol.cmp(&scores[b].symbol))
        });
        self.bus.ok(scan_id, Phase::Rank, scores.len() as u64, None);

        // 6. Entry gates for the top K
        let top_k = self.cfg.pipeline.top_k;
        self.bus
            .start(scan_id, Phase::Gate, top_k.min(order.len()) as u64);

        let data_by_symbol: HashMap<&Symbol, &SymbolData> =
            data.iter().map(|sd| (&sd.symbol, sd)).collect();
        let now_ms = Utc::now().timestamp_millis();
        let mut records: Vec<CandidateRecord> = Vec::with_capacity(scores.len());

        for (position, &idx) in order.iter().enumerate() {
            let rank = (position + 1) as u32;
            let score = &scores[idx];
            let raw = &factor_batch[idx];
            let resid = &outcome.vectors[idx];
            let sd = data_by_symbol
                .get(&score.symbol)
                .expect("scored symbol has data");

            let (micro_record, decision) = if position < top_k {
                let proof = self.microstructure_proof(sd).await;
                let funding_rates: Vec<f64> = sd.funding.iter().map(|(_, r)| *r).collect();
                let funding_z =
                    gates::funding_z_score(&funding_rates, self.cfg.gates.funding_min_venues);
                let newest_bar_age = sd
                    .bars
                    .last()
                    .map(|bar| bar_age_bars(bar.open_time, now_ms, Interval::H1))
                    .unwrap_or(u32::MAX);
                let inputs = GateInputs {
                    final_score: score.final_score,
                    micro: &proof,
                    funding_z,
                    funding_venues: sd.funding.len(),
                    newest_bar_age_bars: newest_bar_age,
                    momentum_24h_pct: momentum::momentum_24h_pct(&sd.bars),
                    accel_4h_pct: momentum::acceleration_4h_pct(&sd.bars),
                    signal_time: started_at,
                    execution_time: Utc::now(),
                    provider_p99_ms: None,
                    atr_proximity: None,
                    relax_count: self.relax.count(&score.symbol),
                    oi_residual: None,
                    etf_tint: None,
                };
                let decision = gates::evaluate(&self.cfg.gates, regime_state.label, &inputs);
                if decision
                    .reasons
                    .iter()
                    .any(|r| r.metrics.get("grace_applied") == Some(&serde_json::json!(true)))
                {
                    self.relax.record(&score.symbol);
                }
                self.bus.progress(
                    scan_id,
                    Phase::Gate,
                    Some(score.symbol.clone()),
                    rank as u64,
                    top_k as u64,
                );
                (Self::micro_record(&proof), Some(decision))
            } else {
                (None, None)
            };

            let mut flags = Vec::new();
            if outcome.skipped {
                flags.push(RESIDUALIZATION_SKIPPED.to_string());
            }

            records.push(CandidateRecord {
                scan_id,
                timestamp: Utc::now(),
                symbol: score.symbol.clone(),
                rank,
                regime: regime_state.label,
                weights: profile.clone(),
                factors: FactorsRecord {
                    raw: raw.clone(),
                    resid: resid.clone(),
                    contributions: score.contributions.clone(),
                },
                score: ScoreRecord {
                    base: score.base,
                    social_add: score.social_add,
                    final_score: score.final_score,
                },
                micro: micro_record,
                gates: decision.as_ref().map(|d| d.reasons.clone()).unwrap_or_default(),
                action: decision.map(|d| d.action),
                flags,
                envelopes: sd.envelopes.clone(),
            });
        }
        self.bus
            .ok(scan_id, Phase::Gate, top_k.min(order.len()) as u64, None);

        // 7. Persist and emit
        let partial = partial || !errors.is_empty();
        let result = ScanResult {
            scan_id,
            started_at,
            finished_at: Utc::now(),
            regime: regime_state,
            universe_hash: universe.file_hash.clone(),
            records,
            errors,
            partial,
        };
        let persisted = self.store.persist(result)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::registry().scan_completed(elapsed_ms);
        self.bus.ok(
            scan_id,
            Phase::Emit,
            total,
            Some(serde_json::json!({
                "candidates": persisted.records.len(),
                "errors": persisted.errors.len(),
                "elapsed_ms": elapsed_ms,
            })),
        );
        tracing::info!(
            %scan_id,
            candidates = persisted.records.len(),
            errors = persisted.errors.len(),
            partial = persisted.partial,
            elapsed_ms,
            "scan finished"
        );
        Ok(persisted)
    }

    /// Facade reads for one symbol: bars, primary book, funding
    async fn fetch_symbol(&self, symbol: &Symbol) -> Result<SymbolData, ScanError> {
        let primary = self.cfg.primary_venue;
        let mut envelopes = Vec::new();

        let kline_env = self
            .facade
            .klines(primary, symbol, Interval::H1, KLINE_LOOKBACK)
            .await?;
        envelopes.push(kline_env.to_ref());
        let bars = DataFacade::klines_of(&kline_env)?;
        let adv_usd = volume::adv_usd(&bars);

        // Book failures degrade quality to its bar proxy instead of
        // failing the symbol
        let primary_book = match self.facade.book(primary, symbol).await {
            Ok(env) => {
                envelopes.push(env.to_ref());
                Some(DataFacade::book_of(&env)?)
            }
            Err(err) => {
                tracing::debug!(%symbol, error = %err, "primary book unavailable");
                None
            }
        };

        let mut funding = Vec::new();
        for venue in self.facade.venues() {
            match self.facade.funding(venue, symbol).await {
                Ok(Some(env)) => {
                    if let Some(rate) = env.payload.get("rate").and_then(|v| v.as_f64()) {
                        funding.push((venue, rate));
                    }
                    envelopes.push(env.to_ref());
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(%symbol, %venue, error = %err, "funding read failed");
                }
            }
        }

        Ok(SymbolData {
            symbol: symbol.clone(),
            bars,
            primary_book,
            funding,
            envelopes,
            adv_usd,
        })
    }

    /// Books from every venue for the proof bundle; venues that cannot
    /// produce a fresh native book record nothing (their absence is the
    /// reason).
    async fn microstructure_proof(&self, sd: &SymbolData) -> MicroProof {
        let mut venues = Vec::new();
        for venue in self.facade.venues() {
            let book = if venue == self.cfg.primary_venue {
                sd.primary_book.clone()
            } else {
                match self.facade.book(venue, &sd.symbol).await {
                    Ok(env) => DataFacade::book_of(&env).ok(),
                    Err(err) => {
                        tracing::debug!(symbol = %sd.symbol, %venue, error = %err, "book read failed");
                        None
                    }
                }
            };
            if let Some(book) = book {
                venues.push(evaluate_venue(venue, &book, &sd.bars, sd.adv_usd));
            }
        }
        MicroProof::from_venues(venues)
    }

    /// Summarize the proof for the scan record: the eligible venue, or the
    /// closest failing one
    fn micro_record(proof: &MicroProof) -> Option<MicroRecord> {
        let venue = proof
            .venues
            .iter()
            .find(|v| v.eligible)
            .or_else(|| proof.venues.first())?;
        Some(MicroRecord {
            venue: venue.venue,
            spread_bps: venue.spread_bps,
            depth_bid_usd: venue.depth_bid_usd,
            depth_ask_usd: venue.depth_ask_usd,
            vadr: venue.vadr,
            vadr_frozen: venue.vadr_frozen,
        })
    }

    /// Regime tick: recompute detector inputs over the universe and apply
    /// the hysteresis rule. Transitions are appended to the regime history.
    pub async fn refresh_regime(&self) -> Result<RegimeState, ScanError> {
        let result = self.regime_inputs().await;
        match result {
            Ok(inputs) => {
                if let Some(transition) = self.regime.on_tick(&inputs) {
                    self.store.append_regime_transition(&transition)?;
                }
                Ok(self.regime.current())
            }
            Err(err) => {
                self.regime.on_tick_failure(&err);
                Err(err)
            }
        }
    }

    async fn regime_inputs(&self) -> Result<crate::regime::RegimeInputs, ScanError> {
        let universe = Universe::load(&self.cfg.universe_path)?;
        let symbols = universe.sorted_symbols();
        let primary = self.cfg.primary_venue;

        let workers = self.cfg.pipeline.max_workers.min(symbols.len().max(1));
        let series: Vec<Vec<Kline>> = stream::iter(symbols)
            .map(|symbol| async move {
                match self.facade.klines(primary, &symbol, Interval::H1, KLINE_LOOKBACK).await {
                    Ok(env) => DataFacade::klines_of(&env).ok(),
                    Err(err) => {
                        tracing::debug!(%symbol, error = %err, "regime input read failed");
                        None
                    }
                }
            })
            .buffer_unordered(workers)
            .filter_map(|bars| async move { bars })
            .collect()
            .await;

        inputs_from_series(&series)
    }
}
