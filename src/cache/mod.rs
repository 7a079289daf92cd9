//! Tiered TTL cache with single-flight refill
//!
//! Keys are `(venue, symbol, kind, granularity)`. Entries carry their
//! envelope plus an insertion time and TTL; expiry is lazy-on-read with a
//! periodic sweep. Capacity is bounded per shard with LRU eviction.
//! Concurrent misses for the same key coalesce into one upstream fetch and
//! every waiter receives the same envelope. A cancelled or failed fetch
//! never poisons the entry.

use crate::config::CacheConfig;
use crate::error::ScanError;
use crate::facade::envelope::Envelope;
use crate::metrics;
use crate::types::{CacheTier, DataKind, Symbol, VenueId};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const SHARD_COUNT: usize = 16;

/// Cache key: one logical read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub kind: DataKind,
    /// Interval / depth / window the read was parameterized with
    pub granularity: String,
}

impl CacheKey {
    pub fn new(
        venue: VenueId,
        symbol: Symbol,
        kind: DataKind,
        granularity: impl Into<String>,
    ) -> Self {
        Self {
            venue,
            symbol,
            kind,
            granularity: granularity.into(),
        }
    }
}

/// Result of a cache read
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit { envelope: Envelope, age: Duration },
    Miss,
}

struct Entry {
    envelope: Envelope,
    inserted_at: Instant,
    ttl: Duration,
    last_used: AtomicU64,
}

type Shard = RwLock<HashMap<CacheKey, Entry>>;

/// Map a data kind to the tier whose TTL governs it
pub fn tier_for(kind: DataKind) -> CacheTier {
    match kind {
        DataKind::Book | DataKind::Trades => CacheTier::Hot,
        DataKind::Klines | DataKind::Funding | DataKind::OpenInterest => CacheTier::Warm,
        DataKind::Metadata => CacheTier::Cold,
    }
}

/// Hot/warm/cold TTL store with provenance
pub struct TieredCache {
    cfg: CacheConfig,
    shards: Vec<Shard>,
    use_counter: AtomicU64,
    inflight: Mutex<HashMap<CacheKey, broadcast::Sender<Result<Envelope, String>>>>,
}

impl TieredCache {
    pub fn new(cfg: CacheConfig) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            cfg,
            shards,
            use_counter: AtomicU64::new(0),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// TTL for a data kind, from the tier configuration
    pub fn ttl_for(&self, kind: DataKind) -> Duration {
        match kind {
            DataKind::Book | DataKind::Trades => self.cfg.hot_ttl,
            DataKind::Klines => self.cfg.warm_ttl,
            DataKind::Funding | DataKind::OpenInterest => self.cfg.vadr_ttl,
            DataKind::Metadata => self.cfg.metadata_ttl,
        }
    }

    fn shard(&self, key: &CacheKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub fn get(&self, key: &CacheKey) -> Lookup {
        self.get_at(key, Instant::now())
    }

    /// Time-injected read; expired entries are removed lazily
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Lookup {
        let tier = tier_for(key.kind);
        {
            let shard = self.shard(key).read();
            if let Some(entry) = shard.get(key) {
                let age = now.saturating_duration_since(entry.inserted_at);
                if age < entry.ttl {
                    entry.last_used.store(
                        self.use_counter.fetch_add(1, Ordering::Relaxed),
                        Ordering::Relaxed,
                    );
                    metrics::registry().cache_hit(tier);
                    return Lookup::Hit {
                        envelope: entry.envelope.clone(),
                        age,
                    };
                }
            } else {
                metrics::registry().cache_miss(tier);
                return Lookup::Miss;
            }
        }
        // Entry existed but expired: drop it under the write lock
        let mut shard = self.shard(key).write();
        if let Some(entry) = shard.get(key) {
            if now.saturating_duration_since(entry.inserted_at) >= entry.ttl {
                shard.remove(key);
            }
        }
        metrics::registry().cache_miss(tier);
        Lookup::Miss
    }

    pub fn insert(&self, key: CacheKey, envelope: Envelope, ttl: Duration) {
        self.insert_at(key, envelope, ttl, Instant::now());
    }

    pub fn insert_at(&self, key: CacheKey, envelope: Envelope, ttl: Duration, now: Instant) {
        let per_shard_cap = (self.cfg.max_entries / SHARD_COUNT).max(1);
        let mut shard = self.shard(&key).write();
        if shard.len() >= per_shard_cap && !shard.contains_key(&key) {
            // Evict the least recently used entry in this shard
            if let Some(victim) = shard
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            {
                shard.remove(&victim);
            }
        }
        shard.insert(
            key,
            Entry {
                envelope,
                inserted_at: now,
                ttl,
                last_used: AtomicU64::new(self.use_counter.fetch_add(1, Ordering::Relaxed)),
            },
        );
    }

    /// Remove expired entries across all shards; returns evicted count
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|_, e| now.saturating_duration_since(e.inserted_at) < e.ttl);
            evicted += before - shard.len();
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweep task
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache.cfg.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "cache sweep");
                }
            }
        })
    }

    /// Read through the cache with single-flight refill
    ///
    /// The first caller for a missing key becomes the leader and runs
    /// `fetch`; concurrent callers wait on a broadcast of the leader's
    /// outcome. The leader inserts into the cache before publishing, so a
    /// late subscriber either joins the flight or hits the fresh entry.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<Envelope, ScanError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Envelope, ScanError>>,
    {
        if let Lookup::Hit { envelope, .. } = self.get(&key) {
            return Ok(envelope);
        }

        enum Role {
            Leader(broadcast::Sender<Result<Envelope, String>>),
            Follower(broadcast::Receiver<Result<Envelope, String>>),
        }

        let role = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(tx) => Role::Follower(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), tx.clone());
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(envelope)) => Ok(envelope),
                Ok(Err(message)) => Err(ScanError::TransientIo {
                    venue: key.venue.to_string(),
                    message: format!("coalesced upstream fetch failed: {}", message),
                }),
                // Leader dropped without publishing (cancelled); the entry
                // is not poisoned, callers may retry
                Err(_) => Err(ScanError::TransientIo {
                    venue: key.venue.to_string(),
                    message: "coalesced upstream fetch cancelled".into(),
                }),
            },
            Role::Leader(tx) => {
                let guard = FlightGuard { cache: self, key: &key };
                let result = fetch().await;
                match result {
                    Ok(envelope) => {
                        self.insert(key.clone(), envelope.clone(), ttl);
                        guard.finish();
                        let _ = tx.send(Ok(envelope.clone()));
                        Ok(envelope)
                    }
                    Err(err) => {
                        guard.finish();
                        let _ = tx.send(Err(err.to_string()));
                        Err(err)
                    }
                }
            }
        }
    }
}

/// Removes the inflight entry when the leader is dropped mid-fetch
struct FlightGuard<'a> {
    cache: &'a TieredCache,
    key: &'a CacheKey,
}

impl FlightGuard<'_> {
    fn finish(self) {
        self.cache.inflight.lock().remove(self.key);
        std::mem::forget(self);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.inflight.lock().remove(self.key);
    }
}
