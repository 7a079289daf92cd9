//! Progress bus
//!
//! Single-writer-per-scan, many-reader event stream over a broadcast
//! channel. Events carry strictly increasing sequence numbers; `progress`
//! updates are throttled to at most one per second per phase, while
//! start/ok/error events always go out. Readers that fall behind receive a
//! dropped count instead of buffered history.

use crate::types::Symbol;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;
const THROTTLE_GAP: Duration = Duration::from_secs(1);

/// Scan phase an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Fetch,
    Score,
    Gate,
    Rank,
    Emit,
}

/// Event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Start,
    Progress,
    Ok,
    Error,
}

/// One typed progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub scan_id: Uuid,
    pub seq: u64,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    pub status: Status,
    /// Completion percentage in [0,100]
    pub percent: f64,
    pub total: u64,
    pub current: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a reader receives: an event, or how many it missed
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Event(ProgressEvent),
    /// The reader lagged and this many events were dropped for it
    Dropped(u64),
}

/// Fan-out progress bus
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
    seq: AtomicU64,
    last_progress: Mutex<HashMap<(Uuid, Phase), Instant>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: AtomicU64::new(0),
            last_progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> BusReader {
        BusReader {
            rx: self.tx.subscribe(),
        }
    }

    fn publish(&self, mut event: ProgressEvent) {
        event.seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        // No receivers is fine; scans run headless too
        let _ = self.tx.send(event);
    }

    /// Phase started; never throttled
    pub fn start(&self, scan_id: Uuid, phase: Phase, total: u64) {
        self.publish(ProgressEvent {
            scan_id,
            seq: 0,
            phase,
            symbol: None,
            status: Status::Start,
            percent: 0.0,
            total,
            current: 0,
            metrics: None,
            error: None,
        });
    }

    /// Incremental progress; coalesced to <= 1 Hz per (scan, phase)
    pub fn progress(
        &self,
        scan_id: Uuid,
        phase: Phase,
        symbol: Option<Symbol>,
        current: u64,
        total: u64,
    ) {
        {
            let mut last = self.last_progress.lock();
            let now = Instant::now();
            match last.get(&(scan_id, phase)) {
                Some(prev) if now.duration_since(*prev) < THROTTLE_GAP => return,
                _ => {
                    last.insert((scan_id, phase), now);
                }
            }
        }
        let percent = if total > 0 {
            (current as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.publish(ProgressEvent {
            scan_id,
            seq: 0,
            phase,
            symbol,
            status: Status::Progress,
            percent,
            total,
            current,
            metrics: None,
            error: None,
        });
    }

    /// Phase completed; never throttled
    pub fn ok(&self, scan_id: Uuid, phase: Phase, total: u64, metrics: Option<serde_json::Value>) {
        self.last_progress.lock().remove(&(scan_id, phase));
        self.publish(ProgressEvent {
            scan_id,
            seq: 0,
            phase,
            symbol: None,
            status: Status::Ok,
            percent: 100.0,
            total,
            current: total,
            metrics,
            error: None,
        });
    }

    /// Failure; never throttled
    pub fn error(&self, scan_id: Uuid, phase: Phase, symbol: Option<Symbol>, error: String) {
        self.publish(ProgressEvent {
            scan_id,
            seq: 0,
            phase,
            symbol,
            status: Status::Error,
            percent: 0.0,
            total: 0,
            current: 0,
            metrics: None,
            error: Some(error),
        });
    }
}

/// Per-reader handle with lag reporting
pub struct BusReader {
    rx: broadcast::Receiver<ProgressEvent>,
}

impl BusReader {
    /// Next message; `None` when the bus is closed
    pub async fn recv(&mut self) -> Option<BusMessage> {
        match self.rx.recv().await {
            Ok(event) => Some(BusMessage::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(BusMessage::Dropped(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking drain used by tests
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        match self.rx.try_recv() {
            Ok(event) => Some(BusMessage::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(BusMessage::Dropped(n)),
            _ => None,
        }
    }

    /// Stream view for consumers that fan events into SSE or log sinks
    pub fn into_stream(self) -> impl futures_util::Stream<Item = BusMessage> {
        use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
        use tokio_stream::wrappers::BroadcastStream;
        use tokio_stream::StreamExt as _;

        BroadcastStream::new(self.rx).map(|item| match item {
            Ok(event) => BusMessage::Event(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => BusMessage::Dropped(n),
        })
    }
}
