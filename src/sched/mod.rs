//! Job scheduler
//!
//! Registry of recurring jobs (`scan.hot`, `scan.warm`, `regime.refresh`,
//! optional `premove.hourly`) with single-fire semantics: at most one run
//! per job is in flight, and a tick that lands while the previous run is
//! still active is recorded as a skipped overlap rather than queued.
//! Shutdown refuses new ticks and drains in-flight runs up to a deadline.

use crate::error::ScanError;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Async job body; each invocation is one run
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ScanError>> + Send + Sync>;

/// Point-in-time job status for the CLI and `/health`
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub period_secs: u64,
    pub running: bool,
    pub runs_ok: u64,
    pub runs_failed: u64,
    pub skipped_overlap: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

struct JobState {
    name: String,
    period: Duration,
    runner: JobFn,
    running: AtomicBool,
    runs_ok: AtomicU64,
    runs_failed: AtomicU64,
    skipped_overlap: AtomicU64,
    last_started: Mutex<Option<DateTime<Utc>>>,
    last_outcome: Mutex<Option<String>>,
}

impl JobState {
    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.name.clone(),
            period_secs: self.period.as_secs(),
            running: self.running.load(Ordering::Acquire),
            runs_ok: self.runs_ok.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            skipped_overlap: self.skipped_overlap.load(Ordering::Relaxed),
            last_started: *self.last_started.lock(),
            last_outcome: self.last_outcome.lock().clone(),
        }
    }

    /// Try to claim the single-fire slot
    fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run_once(self: Arc<Self>) {
        *self.last_started.lock() = Some(Utc::now());
        let outcome = (self.runner)().await;
        match &outcome {
            Ok(()) => {
                self.runs_ok.fetch_add(1, Ordering::Relaxed);
                *self.last_outcome.lock() = Some("ok".into());
            }
            Err(err) => {
                self.runs_failed.fetch_add(1, Ordering::Relaxed);
                *self.last_outcome.lock() = Some(err.kind().to_string());
                tracing::warn!(job = %self.name, error = %err, "job run failed");
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

/// Recurring-job scheduler with graceful drain
pub struct Scheduler {
    jobs: Vec<Arc<JobState>>,
    cancel: CancellationToken,
    drain_deadline: Duration,
}

impl Scheduler {
    pub fn new(drain_deadline: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            cancel: CancellationToken::new(),
            drain_deadline,
        }
    }

    /// Register a job; call before `spawn`
    pub fn register(&mut self, name: impl Into<String>, period: Duration, runner: JobFn) {
        self.jobs.push(Arc::new(JobState {
            name: name.into(),
            period,
            runner,
            running: AtomicBool::new(false),
            runs_ok: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            skipped_overlap: AtomicU64::new(0),
            last_started: Mutex::new(None),
            last_outcome: Mutex::new(None),
        }));
    }

    /// Start one ticker task per job
    ///
    /// The first tick fires after one full period; use `trigger` for an
    /// immediate run.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|job| {
                let job = Arc::clone(job);
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(job.period);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    // Consume the immediate first tick
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => {
                                if job.try_claim() {
                                    tokio::spawn(Arc::clone(&job).run_once());
                                } else {
                                    job.skipped_overlap.fetch_add(1, Ordering::Relaxed);
                                    tracing::warn!(job = %job.name, "SKIPPED_OVERLAP: previous run still active");
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Run a job immediately, honoring single-fire
    pub async fn trigger(&self, name: &str) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::SchedulerRefused {
                job: name.to_string(),
            });
        }
        let job = self
            .jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| ScanError::Validation(format!("unknown job '{}'", name)))?;
        if !job.try_claim() {
            return Err(ScanError::SchedulerRefused {
                job: name.to_string(),
            });
        }
        Arc::clone(job).run_once().await;
        // Surface the run's failure kind to the caller
        match job.last_outcome.lock().as_deref() {
            Some("ok") | None => Ok(()),
            Some(kind) => Err(ScanError::Internal(format!(
                "job {} failed with {}",
                name, kind
            ))),
        }
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.jobs.iter().map(|j| j.status()).collect()
    }

    /// Refuse new ticks and wait for in-flight runs up to the drain deadline
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let drained = tokio::time::timeout(self.drain_deadline, async {
            loop {
                if self.jobs.iter().all(|j| !j.running.load(Ordering::Acquire)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        match drained {
            Ok(()) => tracing::info!("scheduler drained"),
            Err(_) => tracing::warn!(
                deadline_secs = self.drain_deadline.as_secs(),
                "drain deadline exceeded with jobs still running"
            ),
        }
    }
}
